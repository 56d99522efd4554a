//! # Debug Session
//!
//! One executable, at most one live process, and the breakpoints set in it.
//!
//! [`DebugSession`] is what the front-end talks to. It owns the platform
//! controller, the read-only [`BinaryMetadata`] loaded from the executable,
//! and the [`BreakpointManager`], and it implements the parts of the
//! breakpoint protocol that need all three:
//!
//! - turning a trap one byte past an enabled breakpoint into a breakpoint hit,
//!   restoring the original byte and rewinding the instruction pointer;
//! - stepping the restored instruction before the next resume and writing the
//!   trap back (so a breakpoint keeps firing on every pass);
//! - dropping all breakpoint bookkeeping once the target is gone.
//!
//! Symbol and variable lookups return runtime addresses: for a relocated
//! (position-independent) executable the load bias reported by the
//! controller is added to the file addresses from the metadata.

use std::path::{Path, PathBuf};

use crate::breakpoints::{Breakpoint, BreakpointManager};
use crate::debugger::{check_transfer_len, create_controller, ProcessController};
use crate::error::{DebuggerError, Result};
use crate::symbols::BinaryMetadata;
use crate::types::{Address, ProcessId, Registers, StopReason};
use crate::unwind::{Backtrace, StackUnwinder};

/// Resolve a function name when no debug info is loaded
///
/// This is a development and testing affordance, not symbol resolution: it
/// maps the entry points of the bundled sample program to the addresses a
/// default non-PIE x86-64 link would give them, and every other name to a
/// fixed sentinel. It is only consulted for sessions without DWARF.
pub fn development_fallback_address(name: &str) -> Address
{
    match name {
        "main" | "main.main" => Address::new(0x40_1000),
        "fibonacci" | "main.fibonacci" => Address::new(0x40_1100),
        _ => Address::new(0x40_1200),
    }
}

/// A debugging session for one executable
///
/// ## Example
///
/// ```rust,no_run
/// use tzdb_core::session::DebugSession;
/// use tzdb_core::types::StopReason;
///
/// let mut session = DebugSession::new(Some("./testprog".into()))?;
/// session.launch(&[])?;
///
/// let main = session.find_function("main")?;
/// session.set_breakpoint(main)?;
///
/// if let StopReason::Breakpoint(addr) = session.continue_execution()? {
///     let regs = session.registers()?;
///     assert_eq!(regs.pc(), addr);
/// }
/// # Ok::<(), tzdb_core::DebuggerError>(())
/// ```
pub struct DebugSession
{
    executable: Option<PathBuf>,
    controller: Box<dyn ProcessController>,
    metadata: Option<BinaryMetadata>,
    breakpoints: BreakpointManager,
}

impl DebugSession
{
    /// Create a session using the host's process controller
    ///
    /// When `executable` is given its metadata is loaded right away, and a
    /// missing `.debug_info` section is an error.
    ///
    /// ## Errors
    ///
    /// - `UnsupportedPlatform`: no backend for this host
    /// - `Io` / `InvalidBinary` / `NoDebugInfo`: from [`BinaryMetadata::load`]
    pub fn new(executable: Option<PathBuf>) -> Result<Self>
    {
        let controller = create_controller()?;
        Self::with_controller(executable, controller)
    }

    /// Create a session with an explicit controller, loading metadata as [`DebugSession::new`] does
    pub fn with_controller(executable: Option<PathBuf>, controller: Box<dyn ProcessController>) -> Result<Self>
    {
        let metadata = executable.as_deref().map(BinaryMetadata::load).transpose()?;
        Ok(Self::from_parts(executable, metadata, controller))
    }

    /// Assemble a session from already-loaded parts
    pub fn from_parts(
        executable: Option<PathBuf>,
        metadata: Option<BinaryMetadata>,
        controller: Box<dyn ProcessController>,
    ) -> Self
    {
        Self {
            executable,
            controller,
            metadata,
            breakpoints: BreakpointManager::new(),
        }
    }

    /// Path of the executable this session debugs
    pub fn executable(&self) -> Option<&Path>
    {
        self.executable.as_deref()
    }

    /// Metadata loaded from the executable
    pub fn metadata(&self) -> Option<&BinaryMetadata>
    {
        self.metadata.as_ref()
    }

    /// Whether a live process is under trace
    pub fn is_running(&self) -> bool
    {
        self.controller.is_running()
    }

    /// PID of the traced process
    pub fn process_id(&self) -> Option<ProcessId>
    {
        self.controller.process_id()
    }

    /// Start the executable under trace, stopped before its first instruction
    ///
    /// ## Errors
    ///
    /// - `SessionActive`: a process from this session is still live
    /// - `NoExecutable`: the session was created without a path
    /// - `SpawnFailed`: the OS could not start the program
    pub fn launch(&mut self, args: &[String]) -> Result<ProcessId>
    {
        if self.controller.is_running() {
            return Err(DebuggerError::SessionActive);
        }
        let program = self.executable.clone().ok_or(DebuggerError::NoExecutable)?;

        self.breakpoints.clear();
        let pid = self.controller.launch(&program, args)?;
        tracing::info!(
            pid = pid.0,
            program = %program.display(),
            load_bias = format_args!("0x{:x}", self.load_bias()),
            "launched target"
        );
        Ok(pid)
    }

    /// Resume the target and block until it stops again
    ///
    /// A trap raised by an enabled breakpoint is reported as
    /// [`StopReason::Breakpoint`]; by then the original byte is back in place
    /// and the instruction pointer equals the breakpoint address.
    pub fn continue_execution(&mut self) -> Result<StopReason>
    {
        self.ensure_running()?;

        let pc = self.controller.read_registers()?.pc();
        if self.breakpoints.get(pc).is_some() {
            let stop = self.step_past_breakpoint(pc)?;
            if !matches!(stop, StopReason::Stepped(_)) {
                return self.classify(stop);
            }
        }

        let stop = self.controller.resume()?;
        self.classify(stop)
    }

    /// Execute one instruction
    pub fn step(&mut self) -> Result<StopReason>
    {
        self.ensure_running()?;

        let pc = self.controller.read_registers()?.pc();
        let stop = if self.breakpoints.get(pc).is_some() {
            self.step_past_breakpoint(pc)?
        } else {
            self.controller.step()?
        };
        self.classify(stop)
    }

    /// Terminate the target
    pub fn kill(&mut self) -> Result<()>
    {
        self.ensure_running()?;
        self.controller.kill()?;
        self.breakpoints.clear();
        Ok(())
    }

    /// Remove every breakpoint and release the target
    pub fn detach(&mut self) -> Result<()>
    {
        self.ensure_running()?;
        self.breakpoints.restore_all(&mut *self.controller);
        self.controller.detach()
    }

    /// Read the register file of the stopped thread
    pub fn registers(&self) -> Result<Registers>
    {
        self.ensure_running()?;
        self.controller.read_registers()
    }

    /// Read `size` bytes of target memory, exactly as resident
    ///
    /// Installed breakpoints show up as their trap opcode. At most
    /// [`MAX_TRANSFER`](crate::debugger::MAX_TRANSFER) bytes are read at once; larger sizes are `InvalidArgument`.
    pub fn read_memory(&self, address: Address, size: usize) -> Result<Vec<u8>>
    {
        self.ensure_running()?;
        check_transfer_len(size)?;
        self.controller.read_memory(address, size)
    }

    /// Write bytes into target memory
    pub fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        self.ensure_running()?;
        check_transfer_len(data.len())?;
        self.controller.write_memory(address, data)
    }

    /// Install a breakpoint at `address`
    pub fn set_breakpoint(&mut self, address: Address) -> Result<()>
    {
        self.ensure_running()?;
        self.breakpoints.set(&mut *self.controller, address)?;
        Ok(())
    }

    /// Remove the breakpoint at `address`
    ///
    /// Only requires the breakpoint to exist. The table is emptied whenever
    /// the target goes away, so an existing entry implies a live target.
    pub fn remove_breakpoint(&mut self, address: Address) -> Result<()>
    {
        self.breakpoints.remove(&mut *self.controller, address)?;
        Ok(())
    }

    /// Breakpoints in address order
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint>
    {
        self.breakpoints.iter()
    }

    /// Resolve a function name to its runtime entry address
    ///
    /// Resolution order: exact symbol-table match, then (without debug info)
    /// [`development_fallback_address`], otherwise the DWARF function index.
    ///
    /// ## Errors
    ///
    /// `SymbolNotFound` when debug info is loaded and neither table has the name.
    pub fn find_function(&self, name: &str) -> Result<Address>
    {
        let bias = self.load_bias();

        if let Some(address) = self.metadata.as_ref().and_then(|metadata| metadata.symbols().lookup(name)) {
            return Ok(address + bias);
        }

        match self.metadata.as_ref().and_then(BinaryMetadata::debug_info) {
            None => Ok(development_fallback_address(name)),
            Some(info) => info
                .find_function(name)
                .map(|function| function.low_pc + bias)
                .ok_or_else(|| DebuggerError::SymbolNotFound(name.to_string())),
        }
    }

    /// Resolve a global variable to its runtime address
    ///
    /// ## Errors
    ///
    /// - `NoDebugInfo`: no DWARF loaded
    /// - `UnsupportedOrNotFound`: no variable of that name has a constant-address location
    pub fn find_variable_address(&self, name: &str) -> Result<Address>
    {
        let info = self
            .metadata
            .as_ref()
            .and_then(BinaryMetadata::debug_info)
            .ok_or(DebuggerError::NoDebugInfo)?;

        info.find_variable_address(name)
            .map(|address| address + self.load_bias())
            .ok_or_else(|| DebuggerError::UnsupportedOrNotFound(name.to_string()))
    }

    /// Walk the stopped thread's call stack
    pub fn backtrace(&self) -> Result<Backtrace>
    {
        let regs = self.registers()?;
        let unwinder = StackUnwinder::new(&*self.controller, self.metadata.as_ref(), self.load_bias());
        Ok(unwinder.unwind(&regs))
    }

    /// Runtime address minus file address of the main image
    fn load_bias(&self) -> u64
    {
        match (self.controller.image_base(), &self.metadata) {
            (Some(base), Some(metadata)) => base.value().wrapping_sub(metadata.preferred_base().value()),
            _ => 0,
        }
    }

    fn ensure_running(&self) -> Result<()>
    {
        if self.controller.is_running() {
            Ok(())
        } else {
            Err(DebuggerError::NotRunning)
        }
    }

    /// Execute the original instruction under a breakpoint, then re-arm it
    fn step_past_breakpoint(&mut self, pc: Address) -> Result<StopReason>
    {
        self.breakpoints.disarm(&mut *self.controller, pc)?;
        let stop = self.controller.step()?;
        if !stop.is_terminal() {
            self.breakpoints.rearm(&mut *self.controller, pc)?;
        }
        Ok(stop)
    }

    fn classify(&mut self, stop: StopReason) -> Result<StopReason>
    {
        match stop {
            StopReason::Trap(pc) => {
                let Some(address) = pc.checked_sub(1) else {
                    return Ok(stop);
                };
                if !self.breakpoints.is_enabled_at(address) {
                    return Ok(stop);
                }

                self.breakpoints.disarm(&mut *self.controller, address)?;
                let mut regs = self.controller.read_registers()?;
                regs.set_pc(address);
                self.controller.write_registers(&regs)?;
                tracing::debug!(address = %address, "breakpoint hit");
                Ok(StopReason::Breakpoint(address))
            }
            StopReason::Exited(_) | StopReason::Terminated(_) => {
                tracing::info!(?stop, "target is gone");
                self.breakpoints.clear();
                Ok(stop)
            }
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::breakpoints::TRAP_OPCODE;
    use crate::symbols::{DebugInfo, FunctionEntry, SymbolTable, VariableEntry, DW_OP_ADDR};
    use crate::testing::{FakeProcess, ScriptedStop};
    use crate::types::X86_64Register;

    const MAIN: Address = Address::new(0x40_1000);
    const FIB: Address = Address::new(0x40_1100);
    const PROLOGUE: [u8; 4] = [0x55, 0x48, 0x89, 0xE5];

    fn metadata(with_debug_info: bool) -> BinaryMetadata
    {
        let mut symbols = SymbolTable::new();
        symbols.insert("main", MAIN, true, Some(0x100));
        symbols.insert("fibonacci", FIB, true, Some(0x80));
        symbols.finish();

        let debug_info = with_debug_info.then(|| {
            let mut counter = vec![DW_OP_ADDR];
            counter.extend_from_slice(&0x4c_5000u64.to_le_bytes());
            DebugInfo::from_entries(
                vec![
                    FunctionEntry {
                        name: "main".into(),
                        low_pc: MAIN,
                        high_pc: Some(MAIN + 0x100),
                    },
                    FunctionEntry {
                        name: "helper".into(),
                        low_pc: Address::new(0x40_1200),
                        high_pc: Some(Address::new(0x40_1240)),
                    },
                ],
                vec![
                    VariableEntry {
                        name: "counter".into(),
                        location: counter,
                    },
                    VariableEntry {
                        name: "local".into(),
                        location: vec![0x91, 0x70],
                    },
                ],
            )
        });
        BinaryMetadata::from_parts(symbols, debug_info)
    }

    fn program() -> FakeProcess
    {
        FakeProcess::new()
            .with_memory(MAIN, &PROLOGUE)
            .with_memory(FIB, &PROLOGUE)
            .with_entry(MAIN)
    }

    fn session(fake: &FakeProcess) -> DebugSession
    {
        DebugSession::from_parts(Some("/bin/prog".into()), Some(metadata(true)), fake.controller())
    }

    #[test]
    fn test_breakpoint_hit_rewinds_pc_and_restores_byte()
    {
        let fake = program().with_script([ScriptedStop::Reach(FIB)]);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();

        let fib = session.find_function("fibonacci").unwrap();
        session.set_breakpoint(fib).unwrap();
        assert_eq!(fake.peek(FIB), Some(TRAP_OPCODE));

        assert_eq!(session.continue_execution().unwrap(), StopReason::Breakpoint(FIB));
        assert_eq!(session.registers().unwrap().pc(), FIB);
        assert_eq!(session.read_memory(FIB, 4).unwrap(), PROLOGUE.to_vec());
        assert!(!session.breakpoints().next().unwrap().is_enabled());
    }

    #[test]
    fn test_breakpoint_fires_again_after_continue()
    {
        let fake = program().with_script([
            ScriptedStop::Reach(FIB),
            ScriptedStop::Reach(FIB),
            ScriptedStop::Exit(0),
        ]);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();
        session.set_breakpoint(FIB).unwrap();

        assert_eq!(session.continue_execution().unwrap(), StopReason::Breakpoint(FIB));
        assert_eq!(session.continue_execution().unwrap(), StopReason::Breakpoint(FIB));
        assert_eq!(session.continue_execution().unwrap(), StopReason::Exited(0));
    }

    #[test]
    fn test_step_from_breakpoint_rearms_it()
    {
        let fake = program().with_script([ScriptedStop::Reach(FIB)]);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();
        session.set_breakpoint(FIB).unwrap();
        session.continue_execution().unwrap();

        assert_eq!(session.step().unwrap(), StopReason::Stepped(FIB + 1));
        assert_eq!(fake.peek(FIB), Some(TRAP_OPCODE));
        assert!(session.breakpoints().all(Breakpoint::is_enabled));
    }

    #[test]
    fn test_unrelated_trap_is_reported_raw()
    {
        let fake = program()
            .with_memory(Address::new(0x40_1500), &[TRAP_OPCODE])
            .with_script([ScriptedStop::Reach(Address::new(0x40_1500))]);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();

        assert_eq!(session.continue_execution().unwrap(), StopReason::Trap(Address::new(0x40_1501)));
    }

    #[test]
    fn test_signal_stop_is_passed_through()
    {
        let fake = program().with_script([ScriptedStop::Signal(11)]);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();

        assert_eq!(session.continue_execution().unwrap(), StopReason::Signal(11));
        assert!(session.is_running());
    }

    #[test]
    fn test_exit_clears_breakpoints()
    {
        let fake = program().with_script([ScriptedStop::Exit(3)]);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();
        session.set_breakpoint(FIB).unwrap();

        assert_eq!(session.continue_execution().unwrap(), StopReason::Exited(3));
        assert!(!session.is_running());
        assert_eq!(session.breakpoints().count(), 0);
        assert!(matches!(session.registers(), Err(DebuggerError::NotRunning)));
    }

    #[test]
    fn test_operations_require_live_target()
    {
        let fake = program();
        let mut session = session(&fake);

        assert!(matches!(session.continue_execution(), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.step(), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.registers(), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.read_memory(MAIN, 4), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.write_memory(MAIN, &[0]), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.set_breakpoint(MAIN), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.kill(), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.detach(), Err(DebuggerError::NotRunning)));
        assert!(matches!(session.backtrace(), Err(DebuggerError::NotRunning)));
    }

    #[test]
    fn test_oversized_transfers_are_invalid()
    {
        let fake = program();
        let mut session = session(&fake);
        session.launch(&[]).unwrap();

        for size in [usize::MAX, 1usize << 44] {
            assert!(matches!(session.read_memory(MAIN, size), Err(DebuggerError::InvalidArgument(_))));
        }
        let huge = vec![0u8; crate::debugger::MAX_TRANSFER + 1];
        assert!(matches!(session.write_memory(MAIN, &huge), Err(DebuggerError::InvalidArgument(_))));
        assert_eq!(fake.peek(MAIN), Some(PROLOGUE[0]));
        assert_eq!(session.read_memory(MAIN, 4).unwrap(), PROLOGUE);
    }

    #[test]
    fn test_launch_rules()
    {
        let fake = program();
        let mut no_path = DebugSession::from_parts(None, None, fake.controller());
        assert!(matches!(no_path.launch(&[]), Err(DebuggerError::NoExecutable)));

        let mut session = session(&fake);
        let pid = session.launch(&["-v".to_string()]).unwrap();
        assert_eq!(session.process_id(), Some(pid));
        assert!(matches!(session.launch(&[]), Err(DebuggerError::SessionActive)));
        assert_eq!(fake.launches(), vec![(PathBuf::from("/bin/prog"), vec!["-v".to_string()])]);
    }

    #[test]
    fn test_remove_breakpoint_twice_fails()
    {
        let fake = program();
        let mut session = session(&fake);
        session.launch(&[]).unwrap();
        session.set_breakpoint(MAIN).unwrap();

        session.remove_breakpoint(MAIN).unwrap();
        assert_eq!(fake.peek(MAIN), Some(0x55));
        assert!(matches!(
            session.remove_breakpoint(MAIN),
            Err(DebuggerError::BreakpointNotFound(0x40_1000))
        ));
    }

    #[test]
    fn test_detach_restores_code()
    {
        let fake = program();
        let mut session = session(&fake);
        session.launch(&[]).unwrap();
        session.set_breakpoint(MAIN).unwrap();
        session.set_breakpoint(FIB).unwrap();

        session.detach().unwrap();
        assert!(!session.is_running());
        assert_eq!(session.breakpoints().count(), 0);
        assert_eq!(fake.peek(MAIN), Some(0x55));
        assert_eq!(fake.peek(FIB), Some(0x55));
    }

    #[test]
    fn test_kill_forgets_breakpoints()
    {
        let fake = program();
        let mut session = session(&fake);
        session.launch(&[]).unwrap();
        session.set_breakpoint(MAIN).unwrap();

        session.kill().unwrap();
        assert!(!session.is_running());
        assert_eq!(session.breakpoints().count(), 0);
    }

    #[test]
    fn test_find_function_resolution_order()
    {
        let fake = program();
        let session = session(&fake);

        // symbol table first
        assert_eq!(session.find_function("fibonacci").unwrap(), FIB);
        // then DWARF
        assert_eq!(session.find_function("helper").unwrap(), Address::new(0x40_1200));
        assert!(matches!(
            session.find_function("nosuch"),
            Err(DebuggerError::SymbolNotFound(name)) if name == "nosuch"
        ));
    }

    #[test]
    fn test_find_function_fallback_without_debug_info()
    {
        let fake = program();
        let session = DebugSession::from_parts(None, None, fake.controller());

        assert_eq!(session.find_function("main").unwrap(), Address::new(0x40_1000));
        assert_eq!(session.find_function("main.fibonacci").unwrap(), Address::new(0x40_1100));
        assert_eq!(session.find_function("anything").unwrap(), Address::new(0x40_1200));

        let stripped = DebugSession::from_parts(None, Some(metadata(false)), fake.controller());
        assert_eq!(stripped.find_function("fibonacci").unwrap(), FIB);
        assert_eq!(stripped.find_function("helper").unwrap(), Address::new(0x40_1200));
    }

    #[test]
    fn test_find_variable_address()
    {
        let fake = program();
        let session = session(&fake);
        assert_eq!(session.find_variable_address("counter").unwrap(), Address::new(0x4c_5000));
        assert!(matches!(
            session.find_variable_address("local"),
            Err(DebuggerError::UnsupportedOrNotFound(_))
        ));
        assert!(matches!(
            session.find_variable_address("missing"),
            Err(DebuggerError::UnsupportedOrNotFound(_))
        ));

        let stripped = DebugSession::from_parts(None, Some(metadata(false)), fake.controller());
        assert!(matches!(stripped.find_variable_address("counter"), Err(DebuggerError::NoDebugInfo)));
    }

    #[test]
    fn test_lookups_apply_load_bias()
    {
        let base = Address::new(0x5555_5555_0000);
        let fake = FakeProcess::new()
            .with_memory(base + MAIN.value(), &PROLOGUE)
            .with_entry(base + MAIN.value())
            .with_image_base(base);
        let mut session = session(&fake);

        session.launch(&[]).unwrap();
        assert_eq!(session.find_function("main").unwrap(), base + MAIN.value());
        assert_eq!(session.find_variable_address("counter").unwrap(), base + 0x4c_5000);
    }

    #[test]
    fn test_backtrace_walks_frame_pointers()
    {
        let mut stack = Vec::new();
        stack.extend_from_slice(&0x7040u64.to_le_bytes()); // [0x7000] saved rbp
        stack.extend_from_slice(&0x40_1020u64.to_le_bytes()); // [0x7008] return into main
        stack.resize(0x40, 0);
        stack.extend_from_slice(&0u64.to_le_bytes()); // [0x7040] end of chain
        stack.extend_from_slice(&0u64.to_le_bytes());

        let mut regs = Registers::new();
        regs.set(X86_64Register::Rbp, 0x7000);
        regs.set(X86_64Register::Rsp, 0x6ff0);
        let fake = program()
            .with_memory(Address::new(0x7000), &stack)
            .with_registers(regs)
            .with_entry(FIB + 0x10);
        let mut session = session(&fake);
        session.launch(&[]).unwrap();

        let frames = session.backtrace().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pc, FIB + 0x10);
        let top = frames[0].symbol.as_ref().unwrap();
        assert_eq!((top.function.as_str(), top.offset), ("fibonacci", 0x10));
        assert_eq!(frames[1].pc, Address::new(0x40_1020));
        let caller = frames[1].symbol.as_ref().unwrap();
        assert_eq!((caller.function.as_str(), caller.offset), ("main", 0x20));
    }
}
