//! Scripted in-memory process controller.
//!
//! [`FakeProcess`] implements [`ProcessController`] without touching the OS so
//! the breakpoint protocol and the front-end can be exercised anywhere. It
//! models:
//!
//! - a sparse byte-addressed memory (reading an unmapped byte fails);
//! - an x86-64 register file;
//! - execution as a script of [`ScriptedStop`]s consumed by `resume`.
//!
//! A [`ScriptedStop::Reach`] stops the fake only if a trap opcode is resident
//! at that address, in which case it reports a trap with the instruction
//! pointer one past it, exactly as the real backends do. Otherwise execution
//! "passes through" and the next scripted event is consumed. An exhausted
//! script means the program ran to completion and exits with status 0.
//! Single steps advance the program counter by one byte.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::breakpoints::TRAP_OPCODE;
use crate::debugger::{MemoryAccess, ProcessController, RegisterAccess};
use crate::error::{DebuggerError, Result};
use crate::types::{Address, ProcessId, Registers, StopReason};

/// One event in a [`FakeProcess`] execution script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedStop
{
    /// Execution reaches this address; stops only on a resident trap opcode
    Reach(Address),
    /// The target receives a signal
    Signal(i32),
    /// The target exits with a status code
    Exit(i32),
}

/// In-memory stand-in for a traced process
///
/// Clones share state, so a test can hand one clone to a session and keep
/// another to inspect memory after the session has detached or been dropped.
#[derive(Debug, Clone, Default)]
pub struct FakeProcess
{
    state: Rc<RefCell<FakeState>>,
}

#[derive(Debug)]
struct FakeState
{
    memory: BTreeMap<u64, u8>,
    registers: Registers,
    entry: Address,
    script: VecDeque<ScriptedStop>,
    image_base: Option<Address>,
    pid: ProcessId,
    running: bool,
    fail_launch: bool,
    launches: Vec<(PathBuf, Vec<String>)>,
}

impl Default for FakeState
{
    fn default() -> Self
    {
        Self {
            memory: BTreeMap::new(),
            registers: Registers::new(),
            entry: Address::ZERO,
            script: VecDeque::new(),
            image_base: None,
            pid: ProcessId(4242),
            running: false,
            fail_launch: false,
            launches: Vec::new(),
        }
    }
}

impl FakeState
{
    fn ensure_running(&self) -> Result<()>
    {
        if self.running {
            Ok(())
        } else {
            Err(DebuggerError::NotRunning)
        }
    }

    fn exit(&mut self, code: i32) -> StopReason
    {
        self.running = false;
        StopReason::Exited(code)
    }
}

impl FakeProcess
{
    /// A fake with no memory, entry point 0 and an empty script
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Map `bytes` at `address`
    #[must_use]
    pub fn with_memory(self, address: Address, bytes: &[u8]) -> Self
    {
        {
            let mut state = self.state.borrow_mut();
            for (offset, byte) in bytes.iter().enumerate() {
                state.memory.insert(address.value() + offset as u64, *byte);
            }
        }
        self
    }

    /// Program counter after launch
    #[must_use]
    pub fn with_entry(self, entry: Address) -> Self
    {
        self.state.borrow_mut().entry = entry;
        self
    }

    /// Initial register file (its `rip` is replaced by the entry point on launch)
    #[must_use]
    pub fn with_registers(self, registers: Registers) -> Self
    {
        self.state.borrow_mut().registers = registers;
        self
    }

    /// Execution script consumed by `resume`
    #[must_use]
    pub fn with_script(self, script: impl IntoIterator<Item = ScriptedStop>) -> Self
    {
        self.state.borrow_mut().script = script.into_iter().collect();
        self
    }

    /// Runtime base reported for the main image
    #[must_use]
    pub fn with_image_base(self, base: Address) -> Self
    {
        self.state.borrow_mut().image_base = Some(base);
        self
    }

    /// Make `launch` fail with `SpawnFailed`
    #[must_use]
    pub fn failing_launch(self) -> Self
    {
        self.state.borrow_mut().fail_launch = true;
        self
    }

    /// Byte at `address`, regardless of whether the fake is running
    pub fn peek(&self, address: Address) -> Option<u8>
    {
        self.state.borrow().memory.get(&address.value()).copied()
    }

    /// Current program counter, regardless of whether the fake is running
    pub fn pc(&self) -> Address
    {
        self.state.borrow().registers.pc()
    }

    /// Programs launched so far, with their arguments
    pub fn launches(&self) -> Vec<(PathBuf, Vec<String>)>
    {
        self.state.borrow().launches.clone()
    }

    /// Box a clone as a controller for a session
    pub fn controller(&self) -> Box<dyn ProcessController>
    {
        Box::new(self.clone())
    }
}

impl MemoryAccess for FakeProcess
{
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let state = self.state.borrow();
        state.ensure_running()?;
        (0..len as u64)
            .map(|offset| {
                let at = address.value() + offset;
                state
                    .memory
                    .get(&at)
                    .copied()
                    .ok_or_else(|| DebuggerError::memory(at, "unmapped address"))
            })
            .collect()
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.ensure_running()?;
        for offset in 0..data.len() as u64 {
            let at = address.value() + offset;
            if !state.memory.contains_key(&at) {
                return Err(DebuggerError::memory(at, "unmapped address"));
            }
        }
        for (offset, byte) in data.iter().enumerate() {
            state.memory.insert(address.value() + offset as u64, *byte);
        }
        Ok(())
    }
}

impl RegisterAccess for FakeProcess
{
    fn read_registers(&self) -> Result<Registers>
    {
        let state = self.state.borrow();
        state.ensure_running()?;
        Ok(state.registers.clone())
    }

    fn write_registers(&mut self, registers: &Registers) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.ensure_running()?;
        state.registers = registers.clone();
        Ok(())
    }
}

impl ProcessController for FakeProcess
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        let mut state = self.state.borrow_mut();
        if state.running {
            return Err(DebuggerError::SessionActive);
        }
        if state.fail_launch {
            return Err(DebuggerError::SpawnFailed(format!(
                "{}: No such file or directory",
                program.display()
            )));
        }
        state.launches.push((program.to_path_buf(), args.to_vec()));
        let entry = state.entry;
        state.registers.set_pc(entry);
        state.running = true;
        Ok(state.pid)
    }

    fn resume(&mut self) -> Result<StopReason>
    {
        let mut state = self.state.borrow_mut();
        state.ensure_running()?;
        while let Some(event) = state.script.pop_front() {
            match event {
                ScriptedStop::Reach(address) => {
                    if state.memory.get(&address.value()) == Some(&TRAP_OPCODE) {
                        let pc = address + 1;
                        state.registers.set_pc(pc);
                        return Ok(StopReason::Trap(pc));
                    }
                }
                ScriptedStop::Signal(sig) => return Ok(StopReason::Signal(sig)),
                ScriptedStop::Exit(code) => return Ok(state.exit(code)),
            }
        }
        Ok(state.exit(0))
    }

    fn step(&mut self) -> Result<StopReason>
    {
        let mut state = self.state.borrow_mut();
        state.ensure_running()?;
        let pc = state.registers.pc() + 1;
        state.registers.set_pc(pc);
        Ok(StopReason::Stepped(pc))
    }

    fn kill(&mut self) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.ensure_running()?;
        state.running = false;
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        let mut state = self.state.borrow_mut();
        state.ensure_running()?;
        state.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool
    {
        self.state.borrow().running
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        let state = self.state.borrow();
        state.running.then_some(state.pid)
    }

    fn image_base(&self) -> Option<Address>
    {
        self.state.borrow().image_base
    }
}
