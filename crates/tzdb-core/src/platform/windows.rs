//! # Windows Debug-Event Backend
//!
//! [`WindowsController`] drives one debuggee with the Win32 debugging API
//! through `windows-sys`.
//!
//! ## Event model
//!
//! Windows reports everything that happens in a debuggee as a debug event,
//! and the whole process stays frozen until the debugger answers the event
//! with `ContinueDebugEvent`. The controller exploits this: the event that
//! produced the last stop is kept *pending* (not yet continued), which is what
//! keeps the target stopped while the user inspects it. `resume` and `step`
//! answer the pending event and then pump events until the next one worth
//! reporting.
//!
//! The process is created with `DEBUG_ONLY_THIS_PROCESS` and `launch` returns
//! on its `CREATE_PROCESS_DEBUG_EVENT`, before the loader has run any user
//! code. The loader's own initial breakpoint is swallowed.
//!
//! | event | reason | continue status |
//! |-------|--------|-----------------|
//! | `EXCEPTION_BREAKPOINT` | `Trap(address + 1)` | `DBG_CONTINUE` |
//! | `EXCEPTION_SINGLE_STEP` | `Stepped(rip)` | `DBG_CONTINUE` |
//! | other exception | `Exception(code)` | `DBG_EXCEPTION_NOT_HANDLED` |
//! | `EXIT_PROCESS_DEBUG_EVENT` | `Exited(code)` | `DBG_CONTINUE` |
//!
//! Other exceptions are forwarded to the debuggee's own handlers on the next
//! resume, so a crash reaches the target's exception handling unchanged.
//!
//! ## Single-step
//!
//! Sets the trap flag (bit 8 of `EFLAGS`) on the stopped thread and resumes;
//! the CPU raises `EXCEPTION_SINGLE_STEP` after one instruction and clears the
//! flag itself.

use std::collections::HashMap;
use std::ffi::{c_void, OsStr};
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, EXCEPTION_BREAKPOINT, EXCEPTION_SINGLE_STEP, HANDLE,
    NTSTATUS,
};
use windows_sys::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcessStop, FlushInstructionCache, GetThreadContext, ReadProcessMemory,
    SetThreadContext, WaitForDebugEvent, WriteProcessMemory, CONTEXT, CONTEXT_FULL_AMD64, CREATE_PROCESS_DEBUG_EVENT,
    CREATE_THREAD_DEBUG_EVENT, DEBUG_EVENT, EXCEPTION_DEBUG_EVENT, EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT,
    LOAD_DLL_DEBUG_EVENT,
};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, TerminateProcess, DEBUG_ONLY_THIS_PROCESS, INFINITE, PROCESS_INFORMATION, STARTUPINFOW,
};

use crate::debugger::{check_transfer_len, MemoryAccess, ProcessController, RegisterAccess};
use crate::error::{DebuggerError, Result};
use crate::types::{Address, ProcessId, Registers, StopReason, X86_64Register};

/// EFLAGS trap flag
const TRAP_FLAG: u32 = 0x100;

/// A debug event that has been reported but not yet continued
#[derive(Debug, Clone, Copy)]
struct PendingEvent
{
    thread_id: u32,
    status: NTSTATUS,
}

#[derive(Debug)]
struct Target
{
    pid: u32,
    process: HANDLE,
    threads: HashMap<u32, HANDLE>,
    image_base: Address,
    pending: Option<PendingEvent>,
    loader_breakpoint_seen: bool,
}

/// Win32 debug-API controller for x86-64 Windows
#[derive(Debug, Default)]
pub struct WindowsController
{
    target: Option<Target>,
}

fn last_error() -> io::Error
{
    io::Error::last_os_error()
}

fn wide(text: &OsStr) -> Vec<u16>
{
    text.encode_wide().chain(std::iter::once(0)).collect()
}

/// Append `arg` to a command line using the `CommandLineToArgvW` quoting rules
fn push_quoted(command_line: &mut String, arg: &str)
{
    if !command_line.is_empty() {
        command_line.push(' ');
    }
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\u{0b}', '"']) {
        command_line.push_str(arg);
        return;
    }

    command_line.push('"');
    let mut backslashes = 0;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                command_line.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                command_line.push('"');
                backslashes = 0;
            }
            _ => {
                command_line.extend(std::iter::repeat('\\').take(backslashes));
                command_line.push(ch);
                backslashes = 0;
            }
        }
    }
    command_line.extend(std::iter::repeat('\\').take(backslashes * 2));
    command_line.push('"');
}

fn command_line(program: &Path, args: &[String]) -> String
{
    let mut line = String::new();
    push_quoted(&mut line, &program.to_string_lossy());
    for arg in args {
        push_quoted(&mut line, arg);
    }
    line
}

fn wait_for_event() -> Result<DEBUG_EVENT>
{
    // SAFETY: DEBUG_EVENT is plain old data and is fully written on success.
    let mut event: DEBUG_EVENT = unsafe { mem::zeroed() };
    // SAFETY: `event` is a valid, writable DEBUG_EVENT.
    if unsafe { WaitForDebugEvent(&mut event, INFINITE) } == 0 {
        return Err(DebuggerError::trace("WaitForDebugEvent", last_error()));
    }
    Ok(event)
}

fn continue_event(pid: u32, thread_id: u32, status: NTSTATUS) -> Result<()>
{
    // SAFETY: plain value arguments.
    if unsafe { ContinueDebugEvent(pid, thread_id, status) } == 0 {
        return Err(DebuggerError::trace("ContinueDebugEvent", last_error()));
    }
    Ok(())
}

fn close_handle(handle: HANDLE)
{
    if !handle.is_null() {
        // SAFETY: the handle was handed to us by the OS and is closed once.
        unsafe { CloseHandle(handle) };
    }
}

impl Target
{
    fn thread(&self, thread_id: u32) -> Result<HANDLE>
    {
        self.threads
            .get(&thread_id)
            .copied()
            .ok_or_else(|| DebuggerError::trace("thread lookup", format!("unknown thread {thread_id}")))
    }

    /// Thread that reported the pending event
    fn stopped_thread(&self) -> Result<HANDLE>
    {
        let pending = self.pending.ok_or(DebuggerError::NotRunning)?;
        self.thread(pending.thread_id)
    }

    fn context(&self) -> Result<CONTEXT>
    {
        let thread = self.stopped_thread()?;
        // SAFETY: CONTEXT is plain old data; windows-sys declares it 16-byte aligned.
        let mut context: CONTEXT = unsafe { mem::zeroed() };
        context.ContextFlags = CONTEXT_FULL_AMD64;
        // SAFETY: `thread` is a live thread handle of the stopped debuggee.
        if unsafe { GetThreadContext(thread, &mut context) } == 0 {
            return Err(DebuggerError::trace("GetThreadContext", last_error()));
        }
        Ok(context)
    }

    fn set_context(&self, context: &CONTEXT) -> Result<()>
    {
        let thread = self.stopped_thread()?;
        // SAFETY: `context` was obtained from GetThreadContext with CONTEXT_FULL_AMD64.
        if unsafe { SetThreadContext(thread, context) } == 0 {
            return Err(DebuggerError::trace("SetThreadContext", last_error()));
        }
        Ok(())
    }

    /// Answer the pending event, if any
    fn release_pending(&mut self) -> Result<()>
    {
        if let Some(pending) = self.pending.take() {
            continue_event(self.pid, pending.thread_id, pending.status)?;
        }
        Ok(())
    }

    /// Pump debug events until one should be reported to the user
    fn next_stop(&mut self, single_step: bool) -> Result<StopReason>
    {
        loop {
            let event = wait_for_event()?;
            let thread_id = event.dwThreadId;

            match event.dwDebugEventCode {
                CREATE_THREAD_DEBUG_EVENT => {
                    // SAFETY: the union member matches the event code.
                    let info = unsafe { event.u.CreateThread };
                    self.threads.insert(thread_id, info.hThread);
                }
                EXIT_THREAD_DEBUG_EVENT => {
                    self.threads.remove(&thread_id);
                }
                LOAD_DLL_DEBUG_EVENT => {
                    // SAFETY: the union member matches the event code.
                    close_handle(unsafe { event.u.LoadDll }.hFile);
                }
                EXIT_PROCESS_DEBUG_EVENT => {
                    // SAFETY: the union member matches the event code.
                    let code = unsafe { event.u.ExitProcess }.dwExitCode;
                    continue_event(self.pid, thread_id, DBG_CONTINUE)?;
                    return Ok(StopReason::Exited(code as i32));
                }
                EXCEPTION_DEBUG_EVENT => {
                    // SAFETY: the union member matches the event code.
                    let info = unsafe { event.u.Exception };
                    let record = info.ExceptionRecord;

                    match record.ExceptionCode {
                        EXCEPTION_BREAKPOINT if !self.loader_breakpoint_seen => {
                            self.loader_breakpoint_seen = true;
                            tracing::debug!(thread_id, "skipping loader breakpoint");
                        }
                        EXCEPTION_BREAKPOINT => {
                            self.pending = Some(PendingEvent { thread_id, status: DBG_CONTINUE });
                            let address = Address::new(record.ExceptionAddress as u64);
                            return Ok(StopReason::Trap(address + 1));
                        }
                        EXCEPTION_SINGLE_STEP => {
                            self.pending = Some(PendingEvent { thread_id, status: DBG_CONTINUE });
                            let rip = Address::new(self.context()?.Rip);
                            return Ok(if single_step {
                                StopReason::Stepped(rip)
                            } else {
                                StopReason::Trap(rip)
                            });
                        }
                        code => {
                            tracing::debug!(
                                thread_id,
                                code = format_args!("0x{:08x}", code as u32),
                                first_chance = info.dwFirstChance != 0,
                                "exception in debuggee"
                            );
                            self.pending = Some(PendingEvent {
                                thread_id,
                                status: DBG_EXCEPTION_NOT_HANDLED,
                            });
                            return Ok(StopReason::Exception(code as u32));
                        }
                    }
                }
                _ => {}
            }

            continue_event(self.pid, thread_id, DBG_CONTINUE)?;
        }
    }
}

impl WindowsController
{
    pub fn new() -> Self
    {
        Self::default()
    }

    fn target(&self) -> Result<&Target>
    {
        self.target.as_ref().ok_or(DebuggerError::NotRunning)
    }

    fn target_mut(&mut self) -> Result<&mut Target>
    {
        self.target.as_mut().ok_or(DebuggerError::NotRunning)
    }

    /// Answer the pending event, wait for the next stop, and drop the target on exit
    fn run_until_stop(&mut self, single_step: bool) -> Result<StopReason>
    {
        let target = self.target_mut()?;
        target.release_pending()?;
        let stop = target.next_stop(single_step)?;
        if stop.is_terminal() {
            self.target = None;
        }
        Ok(stop)
    }
}

impl Drop for WindowsController
{
    fn drop(&mut self)
    {
        if self.target.is_some() {
            if let Err(e) = self.kill() {
                tracing::warn!("Failed to terminate debuggee: {}", e);
            }
        }
    }
}

impl MemoryAccess for WindowsController
{
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let target = self.target()?;
        check_transfer_len(len)?;
        let mut buffer = vec![0u8; len];
        let mut read = 0usize;
        // SAFETY: `buffer` has room for `len` bytes; `read` receives the count.
        let ok = unsafe {
            ReadProcessMemory(
                target.process,
                address.value() as *const c_void,
                buffer.as_mut_ptr().cast(),
                len,
                &mut read,
            )
        };
        if ok == 0 {
            return Err(DebuggerError::memory(address, last_error()));
        }
        if read != len {
            return Err(DebuggerError::memory(address, format!("short read: {read} of {len} bytes")));
        }
        Ok(buffer)
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        let target = self.target()?;
        let mut written = 0usize;
        // SAFETY: `data` is valid for `data.len()` bytes; `written` receives the count.
        let ok = unsafe {
            WriteProcessMemory(
                target.process,
                address.value() as *const c_void,
                data.as_ptr().cast(),
                data.len(),
                &mut written,
            )
        };
        if ok == 0 {
            return Err(DebuggerError::memory(address, last_error()));
        }
        if written != data.len() {
            return Err(DebuggerError::memory(
                address,
                format!("short write: {written} of {} bytes", data.len()),
            ));
        }
        // SAFETY: flushing a range of the debuggee's own address space.
        unsafe { FlushInstructionCache(target.process, address.value() as *const c_void, data.len()) };
        Ok(())
    }
}

impl RegisterAccess for WindowsController
{
    fn read_registers(&self) -> Result<Registers>
    {
        use X86_64Register as R;

        let context = self.target()?.context()?;
        let mut regs = Registers::new();
        for (register, value) in [
            (R::Rax, context.Rax),
            (R::Rbx, context.Rbx),
            (R::Rcx, context.Rcx),
            (R::Rdx, context.Rdx),
            (R::Rsi, context.Rsi),
            (R::Rdi, context.Rdi),
            (R::Rbp, context.Rbp),
            (R::Rsp, context.Rsp),
            (R::R8, context.R8),
            (R::R9, context.R9),
            (R::R10, context.R10),
            (R::R11, context.R11),
            (R::R12, context.R12),
            (R::R13, context.R13),
            (R::R14, context.R14),
            (R::R15, context.R15),
            (R::Rip, context.Rip),
            (R::Eflags, u64::from(context.EFlags)),
            (R::Cs, u64::from(context.SegCs)),
            (R::Ss, u64::from(context.SegSs)),
            (R::Ds, u64::from(context.SegDs)),
            (R::Es, u64::from(context.SegEs)),
            (R::Fs, u64::from(context.SegFs)),
            (R::Gs, u64::from(context.SegGs)),
        ] {
            regs.set(register, value);
        }
        Ok(regs)
    }

    fn write_registers(&mut self, regs: &Registers) -> Result<()>
    {
        use X86_64Register as R;

        let target = self.target()?;
        let mut context = target.context()?;
        context.Rax = regs.get(R::Rax);
        context.Rbx = regs.get(R::Rbx);
        context.Rcx = regs.get(R::Rcx);
        context.Rdx = regs.get(R::Rdx);
        context.Rsi = regs.get(R::Rsi);
        context.Rdi = regs.get(R::Rdi);
        context.Rbp = regs.get(R::Rbp);
        context.Rsp = regs.get(R::Rsp);
        context.R8 = regs.get(R::R8);
        context.R9 = regs.get(R::R9);
        context.R10 = regs.get(R::R10);
        context.R11 = regs.get(R::R11);
        context.R12 = regs.get(R::R12);
        context.R13 = regs.get(R::R13);
        context.R14 = regs.get(R::R14);
        context.R15 = regs.get(R::R15);
        context.Rip = regs.get(R::Rip);
        context.EFlags = regs.get(R::Eflags) as u32;
        // Segment selectors and FS/GS bases are left as the kernel has them.
        target.set_context(&context)
    }
}

impl ProcessController for WindowsController
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        if self.target.is_some() {
            return Err(DebuggerError::SessionActive);
        }

        let application = wide(program.as_os_str());
        let mut command = wide(OsStr::new(&command_line(program, args)));
        // SAFETY: STARTUPINFOW and PROCESS_INFORMATION are plain old data.
        let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
        startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        // SAFETY: both strings are NUL-terminated and outlive the call; the
        // command line buffer is writable as CreateProcessW requires.
        let ok = unsafe {
            CreateProcessW(
                application.as_ptr(),
                command.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                DEBUG_ONLY_THIS_PROCESS,
                ptr::null(),
                ptr::null(),
                &startup,
                &mut info,
            )
        };
        if ok == 0 {
            return Err(DebuggerError::SpawnFailed(format!("{}: {}", program.display(), last_error())));
        }
        // The debug events carry their own handles.
        close_handle(info.hThread);
        close_handle(info.hProcess);

        loop {
            let event = wait_for_event().map_err(|e| DebuggerError::SpawnFailed(e.to_string()))?;
            if event.dwDebugEventCode == CREATE_PROCESS_DEBUG_EVENT {
                // SAFETY: the union member matches the event code.
                let created = unsafe { event.u.CreateProcessInfo };
                close_handle(created.hFile);

                let mut threads = HashMap::new();
                threads.insert(event.dwThreadId, created.hThread);
                let image_base = Address::new(created.lpBaseOfImage as u64);
                tracing::debug!(pid = info.dwProcessId, image_base = %image_base, "debuggee created");

                self.target = Some(Target {
                    pid: info.dwProcessId,
                    process: created.hProcess,
                    threads,
                    image_base,
                    pending: Some(PendingEvent {
                        thread_id: event.dwThreadId,
                        status: DBG_CONTINUE,
                    }),
                    loader_breakpoint_seen: false,
                });
                return Ok(ProcessId(info.dwProcessId));
            }
            continue_event(event.dwProcessId, event.dwThreadId, DBG_CONTINUE)
                .map_err(|e| DebuggerError::SpawnFailed(e.to_string()))?;
        }
    }

    fn resume(&mut self) -> Result<StopReason>
    {
        self.run_until_stop(false)
    }

    fn step(&mut self) -> Result<StopReason>
    {
        let target = self.target()?;
        let mut context = target.context()?;
        context.EFlags |= TRAP_FLAG;
        target.set_context(&context)?;
        self.run_until_stop(true)
    }

    fn kill(&mut self) -> Result<()>
    {
        let target = self.target_mut()?;
        // SAFETY: `process` is the debuggee's process handle.
        if unsafe { TerminateProcess(target.process, 1) } == 0 {
            return Err(DebuggerError::trace("TerminateProcess", last_error()));
        }
        target.release_pending()?;
        loop {
            let event = wait_for_event()?;
            if event.dwDebugEventCode == LOAD_DLL_DEBUG_EVENT {
                // SAFETY: the union member matches the event code.
                close_handle(unsafe { event.u.LoadDll }.hFile);
            }
            continue_event(event.dwProcessId, event.dwThreadId, DBG_CONTINUE)?;
            if event.dwDebugEventCode == EXIT_PROCESS_DEBUG_EVENT {
                break;
            }
        }
        self.target = None;
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        let target = self.target_mut()?;
        target.release_pending()?;
        // SAFETY: plain value argument.
        if unsafe { DebugActiveProcessStop(target.pid) } == 0 {
            return Err(DebuggerError::trace("DebugActiveProcessStop", last_error()));
        }
        self.target = None;
        Ok(())
    }

    fn is_running(&self) -> bool
    {
        self.target.is_some()
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        self.target.as_ref().map(|target| ProcessId(target.pid))
    }

    fn image_base(&self) -> Option<Address>
    {
        self.target.as_ref().map(|target| target.image_base)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_command_line_plain_arguments()
    {
        let line = command_line(Path::new(r"C:\tools\prog.exe"), &["-v".into(), "42".into()]);
        assert_eq!(line, r"C:\tools\prog.exe -v 42");
    }

    #[test]
    fn test_command_line_quotes_spaces_and_quotes()
    {
        let line = command_line(
            Path::new(r"C:\Program Files\prog.exe"),
            &["a b".into(), r#"say "hi""#.into(), String::new(), r"dir\".into()],
        );
        assert_eq!(line, r#""C:\Program Files\prog.exe" "a b" "say \"hi\"" "" dir\"#);
    }
}
