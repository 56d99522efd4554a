//! # Linux ptrace Backend
//!
//! [`PtraceController`] drives one tracee with `ptrace(2)` through the `nix`
//! crate.
//!
//! ## Launch
//!
//! The child calls `PTRACE_TRACEME` between `fork` and `exec`, so the kernel
//! stops it with `SIGTRAP` as soon as the new image is loaded and before any
//! user instruction runs. The parent waits for that stop, sets
//! `PTRACE_O_EXITKILL` (the tracee dies with the debugger), and reads the
//! main image's mapping from `/proc/<pid>/maps` to compute the PIE load bias.
//!
//! ## Stops
//!
//! Every `waitpid` status is classified into a [`StopReason`]:
//!
//! | status | reason |
//! |--------|--------|
//! | `Exited(code)` | `Exited(code)` |
//! | `Signaled(sig)` | `Terminated(sig)` |
//! | `Stopped(SIGTRAP)` after `PTRACE_CONT` | `Trap(rip)` |
//! | `Stopped(SIGTRAP)` after `PTRACE_SINGLESTEP` | `Stepped(rip)` |
//! | `Stopped(other)` | `Signal(other)`, delivered on the next resume |
//!
//! ## Memory
//!
//! `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` move one word at a time; the
//! [`memory`](crate::memory) helpers do the word splitting.

use std::ffi::c_void;
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use nix::libc::{c_long, user_regs_struct};
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::debugger::{MemoryAccess, ProcessController, RegisterAccess};
use crate::error::{DebuggerError, Result};
use crate::memory::{read_words, write_words, WORD_SIZE};
use crate::types::{Address, ProcessId, Registers, StopReason, X86_64Register};

/// ptrace-based controller for x86-64 Linux
#[derive(Debug, Default)]
pub struct PtraceController
{
    pid: Option<Pid>,
    /// Signal observed at the last stop, re-injected on the next resume
    pending_signal: Option<Signal>,
    image_base: Option<Address>,
}

impl PtraceController
{
    pub fn new() -> Self
    {
        Self::default()
    }

    fn pid(&self) -> Result<Pid>
    {
        self.pid.ok_or(DebuggerError::NotRunning)
    }

    fn forget_target(&mut self)
    {
        self.pid = None;
        self.pending_signal = None;
        self.image_base = None;
    }

    fn current_pc(&self, pid: Pid) -> Result<Address>
    {
        let regs = ptrace::getregs(pid).map_err(|e| DebuggerError::trace("ptrace(PTRACE_GETREGS)", e))?;
        Ok(Address::new(regs.rip))
    }

    /// Block until the tracee stops and classify the stop
    ///
    /// `on_trap` builds the reason for a `SIGTRAP` stop from the current
    /// instruction pointer.
    fn wait_for_stop(&mut self, pid: Pid, on_trap: fn(Address) -> StopReason) -> Result<StopReason>
    {
        loop {
            let status = waitpid(pid, None).map_err(|e| DebuggerError::trace("waitpid", e))?;
            tracing::debug!(?status, "tracee status");

            match status {
                WaitStatus::Exited(_, code) => {
                    self.forget_target();
                    return Ok(StopReason::Exited(code));
                }
                WaitStatus::Signaled(_, sig, _) => {
                    self.forget_target();
                    return Ok(StopReason::Terminated(sig as i32));
                }
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    return Ok(on_trap(self.current_pc(pid)?));
                }
                WaitStatus::Stopped(_, sig) => {
                    self.pending_signal = Some(sig);
                    return Ok(StopReason::Signal(sig as i32));
                }
                // Event and syscall stops are not requested; let the tracee go on.
                WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => {
                    ptrace::cont(pid, None).map_err(|e| DebuggerError::trace("ptrace(PTRACE_CONT)", e))?;
                }
                WaitStatus::Continued(_) | WaitStatus::StillAlive => {}
            }
        }
    }

    fn peek(pid: Pid, address: Address) -> Result<[u8; WORD_SIZE]>
    {
        let word = ptrace::read(pid, address.value() as *mut c_void).map_err(|e| DebuggerError::memory(address, e))?;
        Ok(word.to_ne_bytes())
    }

    fn poke(pid: Pid, address: Address, word: [u8; WORD_SIZE]) -> Result<()>
    {
        ptrace::write(pid, address.value() as *mut c_void, c_long::from_ne_bytes(word))
            .map_err(|e| DebuggerError::memory(address, e))
    }
}

impl Drop for PtraceController
{
    fn drop(&mut self)
    {
        if let Some(pid) = self.pid.take() {
            if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
                tracing::warn!("Failed to kill tracee {}: {}", pid, e);
                return;
            }
            let _ = waitpid(pid, None);
        }
    }
}

impl MemoryAccess for PtraceController
{
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let pid = self.pid()?;
        read_words(address, len, |word| Self::peek(pid, word))
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        let pid = self.pid()?;
        write_words(address, data, |word| Self::peek(pid, word), |word, bytes| Self::poke(pid, word, bytes))
    }
}

impl RegisterAccess for PtraceController
{
    fn read_registers(&self) -> Result<Registers>
    {
        let pid = self.pid()?;
        let raw = ptrace::getregs(pid).map_err(|e| DebuggerError::trace("ptrace(PTRACE_GETREGS)", e))?;
        Ok(registers_from_user_regs(&raw))
    }

    fn write_registers(&mut self, registers: &Registers) -> Result<()>
    {
        let pid = self.pid()?;
        // Start from the live set so orig_rax and friends keep their values.
        let mut raw = ptrace::getregs(pid).map_err(|e| DebuggerError::trace("ptrace(PTRACE_GETREGS)", e))?;
        apply_registers(&mut raw, registers);
        ptrace::setregs(pid, raw).map_err(|e| DebuggerError::trace("ptrace(PTRACE_SETREGS)", e))
    }
}

impl ProcessController for PtraceController
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::SessionActive);
        }

        let mut command = Command::new(program);
        command.args(args);
        // SAFETY: the hook only issues the PTRACE_TRACEME syscall, which is
        // async-signal-safe and touches no state shared with the parent.
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(std::io::Error::from));
        }
        let child = command
            .spawn()
            .map_err(|e| DebuggerError::SpawnFailed(format!("{}: {}", program.display(), e)))?;
        let pid = Pid::from_raw(child.id() as i32);

        match waitpid(pid, None) {
            Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {}
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                return Err(DebuggerError::SpawnFailed(format!(
                    "{}: exited before exec stop ({:?})",
                    program.display(),
                    status
                )));
            }
            Ok(status) => {
                reap_abandoned(pid);
                return Err(DebuggerError::SpawnFailed(format!(
                    "{}: unexpected initial status {:?}",
                    program.display(),
                    status
                )));
            }
            Err(e) => {
                reap_abandoned(pid);
                return Err(DebuggerError::SpawnFailed(format!("{}: {}", program.display(), e)));
            }
        }

        if let Err(e) = ptrace::setoptions(pid, Options::PTRACE_O_EXITKILL) {
            tracing::warn!("Failed to set PTRACE_O_EXITKILL on {}: {}", pid, e);
        }

        self.pid = Some(pid);
        self.pending_signal = None;
        self.image_base = read_image_base(pid);
        tracing::debug!(pid = pid.as_raw(), image_base = ?self.image_base, "tracee stopped at exec");

        Ok(ProcessId(pid.as_raw() as u32))
    }

    fn resume(&mut self) -> Result<StopReason>
    {
        let pid = self.pid()?;
        ptrace::cont(pid, self.pending_signal.take()).map_err(|e| DebuggerError::trace("ptrace(PTRACE_CONT)", e))?;
        self.wait_for_stop(pid, StopReason::Trap)
    }

    fn step(&mut self) -> Result<StopReason>
    {
        let pid = self.pid()?;
        ptrace::step(pid, self.pending_signal.take())
            .map_err(|e| DebuggerError::trace("ptrace(PTRACE_SINGLESTEP)", e))?;
        self.wait_for_stop(pid, StopReason::Stepped)
    }

    fn kill(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        signal::kill(pid, Signal::SIGKILL).map_err(|e| DebuggerError::trace("kill(SIGKILL)", e))?;
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to reap killed tracee {}: {}", pid, e);
                    break;
                }
            }
        }
        self.forget_target();
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        ptrace::detach(pid, self.pending_signal.take()).map_err(|e| DebuggerError::trace("ptrace(PTRACE_DETACH)", e))?;
        self.forget_target();
        Ok(())
    }

    fn is_running(&self) -> bool
    {
        self.pid.is_some()
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        self.pid.map(|pid| ProcessId(pid.as_raw() as u32))
    }

    fn image_base(&self) -> Option<Address>
    {
        self.image_base
    }
}

/// Kill a child that never reached its exec stop and collect its exit status
fn reap_abandoned(pid: Pid)
{
    if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
        tracing::warn!("Failed to kill abandoned child {}: {}", pid, e);
    }
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

fn read_image_base(pid: Pid) -> Option<Address>
{
    let exe = fs::read_link(format!("/proc/{pid}/exe")).ok()?;
    let maps = fs::read_to_string(format!("/proc/{pid}/maps")).ok()?;
    parse_maps_base(&maps, &exe).map(Address::new)
}

/// Start of the first file-offset-0 mapping of `exe` in a `/proc/<pid>/maps` listing
///
/// Each line reads `start-end perms offset dev inode [path]`.
pub fn parse_maps_base(maps: &str, exe: &Path) -> Option<u64>
{
    maps.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let offset = fields.nth(1)?;
        let path = line.find('/').map(|start| line[start..].trim_end())?;

        if Path::new(path) != exe || u64::from_str_radix(offset, 16).ok()? != 0 {
            return None;
        }
        let (start, _) = range.split_once('-')?;
        u64::from_str_radix(start, 16).ok()
    })
}

fn registers_from_user_regs(raw: &user_regs_struct) -> Registers
{
    use X86_64Register as R;

    let mut regs = Registers::new();
    for (register, value) in [
        (R::Rax, raw.rax),
        (R::Rbx, raw.rbx),
        (R::Rcx, raw.rcx),
        (R::Rdx, raw.rdx),
        (R::Rsi, raw.rsi),
        (R::Rdi, raw.rdi),
        (R::Rbp, raw.rbp),
        (R::Rsp, raw.rsp),
        (R::R8, raw.r8),
        (R::R9, raw.r9),
        (R::R10, raw.r10),
        (R::R11, raw.r11),
        (R::R12, raw.r12),
        (R::R13, raw.r13),
        (R::R14, raw.r14),
        (R::R15, raw.r15),
        (R::Rip, raw.rip),
        (R::Eflags, raw.eflags),
        (R::Cs, raw.cs),
        (R::Ss, raw.ss),
        (R::Ds, raw.ds),
        (R::Es, raw.es),
        (R::Fs, raw.fs),
        (R::Gs, raw.gs),
        (R::FsBase, raw.fs_base),
        (R::GsBase, raw.gs_base),
    ] {
        regs.set(register, value);
    }
    regs
}

fn apply_registers(raw: &mut user_regs_struct, regs: &Registers)
{
    use X86_64Register as R;

    raw.rax = regs.get(R::Rax);
    raw.rbx = regs.get(R::Rbx);
    raw.rcx = regs.get(R::Rcx);
    raw.rdx = regs.get(R::Rdx);
    raw.rsi = regs.get(R::Rsi);
    raw.rdi = regs.get(R::Rdi);
    raw.rbp = regs.get(R::Rbp);
    raw.rsp = regs.get(R::Rsp);
    raw.r8 = regs.get(R::R8);
    raw.r9 = regs.get(R::R9);
    raw.r10 = regs.get(R::R10);
    raw.r11 = regs.get(R::R11);
    raw.r12 = regs.get(R::R12);
    raw.r13 = regs.get(R::R13);
    raw.r14 = regs.get(R::R14);
    raw.r15 = regs.get(R::R15);
    raw.rip = regs.get(R::Rip);
    raw.eflags = regs.get(R::Eflags);
    raw.cs = regs.get(R::Cs);
    raw.ss = regs.get(R::Ss);
    raw.ds = regs.get(R::Ds);
    raw.es = regs.get(R::Es);
    raw.fs = regs.get(R::Fs);
    raw.gs = regs.get(R::Gs);
    raw.fs_base = regs.get(R::FsBase);
    raw.gs_base = regs.get(R::GsBase);
}

#[cfg(test)]
mod tests
{
    use nix::sys::wait::WaitPidFlag;

    use super::*;

    const MAPS: &str = "\
55d4c8a00000-55d4c8a01000 r--p 00000000 fd:01 1835 /home/user/my prog
55d4c8a01000-55d4c8a02000 r-xp 00001000 fd:01 1835 /home/user/my prog
7f1c2e000000-7f1c2e028000 r--p 00000000 fd:01 4242 /usr/lib/x86_64-linux-gnu/libc.so.6
7ffd1a2b0000-7ffd1a2d1000 rw-p 00000000 00:00 0                          [stack]
";

    #[test]
    fn test_reap_abandoned_leaves_no_zombie()
    {
        let child = std::process::Command::new("/bin/sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        reap_abandoned(pid);

        assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(nix::errno::Errno::ECHILD));
    }

    #[test]
    fn test_parse_maps_base_finds_main_image()
    {
        assert_eq!(parse_maps_base(MAPS, Path::new("/home/user/my prog")), Some(0x55d4_c8a0_0000));
    }

    #[test]
    fn test_parse_maps_base_requires_offset_zero()
    {
        let maps = "00402000-00403000 r-xp 00001000 fd:01 77 /tmp/a.out\n00400000-00401000 r--p 00000000 fd:01 77 /tmp/a.out\n";
        assert_eq!(parse_maps_base(maps, Path::new("/tmp/a.out")), Some(0x40_0000));
    }

    #[test]
    fn test_parse_maps_base_unknown_executable()
    {
        assert_eq!(parse_maps_base(MAPS, Path::new("/bin/true")), None);
        assert_eq!(parse_maps_base("", Path::new("/bin/true")), None);
    }

    #[test]
    fn test_register_conversion_preserves_unmodelled_fields()
    {
        // SAFETY: user_regs_struct is plain old data; all-zero is valid.
        let mut raw: user_regs_struct = unsafe { std::mem::zeroed() };
        raw.rip = 0x40_1000;
        raw.rsp = 0x7ffd_0000;
        raw.orig_rax = 59;

        let mut regs = registers_from_user_regs(&raw);
        assert_eq!(regs.pc(), Address::new(0x40_1000));
        assert_eq!(regs.sp(), Address::new(0x7ffd_0000));

        regs.set_pc(Address::new(0x40_1001));
        apply_registers(&mut raw, &regs);
        assert_eq!(raw.rip, 0x40_1001);
        assert_eq!(raw.orig_rax, 59);
    }
}
