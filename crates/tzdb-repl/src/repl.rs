//! # Command Loop
//!
//! [`Repl`] owns the active [`DebugSession`] and turns each parsed
//! [`Command`] into session calls, writing results to any [`Write`] sink.
//!
//! There is always exactly one session. The first one has no executable; a
//! `launch` replaces it with a session for the named program, but only when
//! the current target is not running. `detach` and `kill` keep the session,
//! so commands that need a live target then fail with "process is not
//! running" until the next `launch`.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use tzdb_core::events::format_stop_reason;
use tzdb_core::{DebugSession, DebuggerError};

use crate::command::{BreakTarget, Command, HELP};
use crate::error::Result;
use crate::format;

/// Printed once when the loop starts
pub const BANNER: &str = "TZGin2 Debugger v1.0\nType 'help' for available commands";

/// Printed before each input line
pub const PROMPT: &str = "(tzdb) ";

/// Creates the session for a `launch`
///
/// The host implementation loads the executable's metadata and picks the
/// platform backend; tests substitute a scripted controller.
pub trait SessionFactory
{
    /// Build a session for `executable` (or an empty one for `None`)
    ///
    /// ## Errors
    ///
    /// Whatever [`DebugSession::new`] reports: metadata loading failures, or
    /// `UnsupportedPlatform`.
    fn create(&mut self, executable: Option<PathBuf>) -> tzdb_core::Result<DebugSession>;
}

/// Sessions backed by the host's process controller
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSessionFactory;

impl SessionFactory for HostSessionFactory
{
    fn create(&mut self, executable: Option<PathBuf>) -> tzdb_core::Result<DebugSession>
    {
        DebugSession::new(executable)
    }
}

/// What the loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow
{
    Continue,
    Quit,
}

/// Interactive command loop
pub struct Repl<F, W>
{
    session: DebugSession,
    factory: F,
    out: W,
}

impl<F: SessionFactory, W: Write> Repl<F, W>
{
    /// Create a loop with an empty initial session
    ///
    /// ## Errors
    ///
    /// `UnsupportedPlatform` when the host has no process-control backend.
    pub fn new(mut factory: F, out: W) -> tzdb_core::Result<Self>
    {
        let session = factory.create(None)?;
        Ok(Self { session, factory, out })
    }

    /// The active session
    pub fn session(&self) -> &DebugSession
    {
        &self.session
    }

    /// Give back the output sink
    pub fn into_output(self) -> W
    {
        self.out
    }

    /// Print the banner, then read and execute lines until `quit` or end of input
    ///
    /// Command failures are printed as `Error: <message>` and do not stop the
    /// loop. End of input behaves like a silent `quit`.
    ///
    /// ## Errors
    ///
    /// Only failures to read input or write output.
    pub fn run<R: BufRead>(&mut self, input: R) -> std::io::Result<()>
    {
        self.run_with(None, input)
    }

    /// Like [`Repl::run`], executing `first` right after the banner
    ///
    /// ## Errors
    ///
    /// Only failures to read input or write output.
    pub fn run_with<R: BufRead>(&mut self, first: Option<Command>, mut input: R) -> std::io::Result<()>
    {
        writeln!(self.out, "{BANNER}")?;

        if let Some(command) = first {
            let result = self.execute(command);
            if self.report(result)? == Flow::Quit {
                return Ok(());
            }
        }

        let mut line = String::new();
        loop {
            write!(self.out, "{PROMPT}")?;
            self.out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                tracing::debug!("end of input");
                self.release_target();
                return Ok(());
            }

            let result = self.execute_line(&line);
            if self.report(result)? == Flow::Quit {
                return Ok(());
            }
        }
    }

    /// Print a failed command's error; failures never end the loop
    fn report(&mut self, result: Result<Flow>) -> std::io::Result<Flow>
    {
        match result {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(self.out, "Error: {e}")?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Parse and execute one line
    ///
    /// ## Errors
    ///
    /// Any [`crate::ReplError`]; none of them leave the session unusable.
    pub fn execute_line(&mut self, line: &str) -> Result<Flow>
    {
        match Command::parse(line)? {
            Some(command) => self.execute(command),
            None => Ok(Flow::Continue),
        }
    }

    /// Execute one command
    ///
    /// ## Errors
    ///
    /// Any [`crate::ReplError`]; none of them leave the session unusable.
    pub fn execute(&mut self, command: Command) -> Result<Flow>
    {
        tracing::debug!(?command, "executing");

        match command {
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Launch { program, args } => self.launch(program, &args)?,
            Command::Continue => {
                let stop = self.session.continue_execution()?;
                writeln!(self.out, "{}", format_stop_reason(stop))?;
            }
            Command::Break(target) => {
                let address = match target {
                    BreakTarget::Address(address) => address,
                    BreakTarget::Function(name) => self.session.find_function(&name)?,
                };
                self.session.set_breakpoint(address)?;
                writeln!(self.out, "Breakpoint set at {address}")?;
            }
            Command::Delete(address) => {
                self.session.remove_breakpoint(address)?;
                writeln!(self.out, "Breakpoint removed at {address}")?;
            }
            Command::Step => {
                let stop = self.session.step()?;
                writeln!(self.out, "{}", format_stop_reason(stop))?;
            }
            Command::Registers => {
                let regs = self.session.registers()?;
                write!(self.out, "{}", format::registers(&regs))?;
            }
            Command::Memory { address, size } => {
                let data = self.session.read_memory(address, size)?;
                write!(self.out, "{}", format::hex_dump(address, &data))?;
            }
            Command::Stack => {
                let frames = self.session.backtrace()?;
                writeln!(self.out, "Stack trace:")?;
                for frame in &frames {
                    writeln!(self.out, "  #{}: {}", frame.index, format::frame(frame))?;
                }
            }
            Command::Breakpoints => write!(self.out, "{}", format::breakpoint_list(self.session.breakpoints()))?,
            Command::Print { name, size } => {
                let address = self.session.find_variable_address(&name)?;
                let data = self.session.read_memory(address, size)?;
                writeln!(self.out, "{name} ({address}): {}", format::hex_bytes(&data))?;
            }
            Command::Set { name, value } => {
                let address = self.session.find_variable_address(&name)?;
                self.session.write_memory(address, &value.to_le_bytes())?;
                writeln!(self.out, "Set {name} ({address}) = 0x{value:x}")?;
            }
            Command::Detach => {
                self.session.detach()?;
                writeln!(self.out, "Detached from process")?;
            }
            Command::Kill => {
                self.session.kill()?;
                writeln!(self.out, "Process killed")?;
            }
            Command::Quit => {
                self.release_target();
                writeln!(self.out, "Goodbye!")?;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn launch(&mut self, program: PathBuf, args: &[String]) -> Result<()>
    {
        if self.session.is_running() {
            return Err(DebuggerError::SessionActive.into());
        }

        self.session = self.factory.create(Some(program))?;
        let pid = self.session.launch(args)?;
        writeln!(self.out, "Process started with PID: {pid}")?;
        Ok(())
    }

    /// Detach from a live target before leaving
    fn release_target(&mut self)
    {
        if !self.session.is_running() {
            return;
        }
        if let Err(e) = self.session.detach() {
            tracing::warn!("Failed to detach on exit: {}", e);
        }
    }
}
