//! # Process Control Traits
//!
//! The capability interface every platform backend implements.
//!
//! The interface is split in three so that code which only needs part of it can
//! say so: the breakpoint manager only needs [`MemoryAccess`], the stack
//! unwinder needs memory and registers, and the session drives the full
//! [`ProcessController`].
//!
//! - **Linux**: `ptrace(2)` (`PTRACE_TRACEME`, `PTRACE_CONT`, `PTRACE_SINGLESTEP`, `PEEKDATA`/`POKEDATA`)
//! - **Windows**: the Win32 debug-event loop (`WaitForDebugEvent`/`ContinueDebugEvent`,
//!   `ReadProcessMemory`/`WriteProcessMemory`, `GetThreadContext`/`SetThreadContext`)
//!
//! The backend is picked once, by [`create_controller`], from the host the
//! debugger was compiled for. Nothing else in the crate looks at the host OS.

use std::path::Path;

use crate::error::{DebuggerError, Result};
use crate::types::{Address, ProcessId, Registers, StopReason};

/// Largest number of bytes a single read or write may transfer (1 MiB)
pub const MAX_TRANSFER: usize = 1 << 20;

/// Reject transfers longer than [`MAX_TRANSFER`]
///
/// ## Errors
///
/// `InvalidArgument` when `len` exceeds the limit.
pub fn check_transfer_len(len: usize) -> Result<()>
{
    if len > MAX_TRANSFER {
        return Err(DebuggerError::InvalidArgument(format!(
            "transfer of {len} bytes exceeds the {MAX_TRANSFER}-byte limit"
        )));
    }
    Ok(())
}

/// Raw access to the target's address space
///
/// Reads and writes go straight to the live process: no caching, and no
/// hiding of installed trap opcodes.
pub trait MemoryAccess
{
    /// Read exactly `len` bytes starting at `address`
    ///
    /// ## Errors
    ///
    /// - `NotRunning`: no live target
    /// - `InvalidArgument`: `len` exceeds [`MAX_TRANSFER`]
    /// - `MemoryAccessFailed`: any part of the range is unreadable
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `address`
    ///
    /// Writes into read-only text pages succeed: both ptrace and
    /// `WriteProcessMemory` bypass page protections for a debugger.
    ///
    /// ## Errors
    ///
    /// - `NotRunning`: no live target
    /// - `MemoryAccessFailed`: any part of the range is unwritable
    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>;
}

/// Access to the register file of the stopped thread
pub trait RegisterAccess
{
    /// Read the general registers of the thread that reported the last stop
    ///
    /// ## Errors
    ///
    /// - `NotRunning`: no live target
    /// - `TraceFailed`: the OS refused the register query
    fn read_registers(&self) -> Result<Registers>;

    /// Write the general registers back
    ///
    /// Registers that [`Registers`] does not model keep their current values.
    fn write_registers(&mut self, registers: &Registers) -> Result<()>;
}

/// Lifecycle control of one traced process
///
/// ## Lifecycle
///
/// 1. `launch`: the child is created under trace and left stopped before its
///    first user instruction.
/// 2. `resume` / `step`: block until the next trace-stop event and classify it.
/// 3. `kill` / `detach`, or a terminal stop (`Exited`/`Terminated`), end the
///    trace. `is_running` is `false` from then on.
///
/// A controller that is not running rejects every operation except `launch`
/// with `NotRunning`.
///
/// ## Thread Safety
///
/// Tracing is bound to the OS thread that launched the target (both ptrace and
/// the Win32 debug API enforce this), so controllers are used from a single
/// thread.
pub trait ProcessController: MemoryAccess + RegisterAccess
{
    /// Spawn `program` with `args` under trace control
    ///
    /// ## Errors
    ///
    /// - `SessionActive`: this controller already traces a live process
    /// - `SpawnFailed`: the binary could not be started or did not reach its
    ///   initial stop
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>;

    /// Resume and block until the next trace-stop event
    ///
    /// Traps are reported as [`StopReason::Trap`] carrying the raw instruction
    /// pointer; deciding whether a trap belongs to a breakpoint is the
    /// caller's job.
    fn resume(&mut self) -> Result<StopReason>;

    /// Execute a single instruction and block until it completes
    fn step(&mut self) -> Result<StopReason>;

    /// Terminate the target and reap it
    fn kill(&mut self) -> Result<()>;

    /// Release trace control and let the target run freely
    fn detach(&mut self) -> Result<()>;

    /// Whether a live process is under trace
    fn is_running(&self) -> bool;

    /// Identifier of the traced process, if any
    fn process_id(&self) -> Option<ProcessId>;

    /// Runtime address at which the main executable image is mapped
    ///
    /// `None` when unknown; callers then assume the image was loaded at its
    /// preferred base.
    fn image_base(&self) -> Option<Address>
    {
        None
    }
}

/// Create the process controller for the host platform
///
/// ## Errors
///
/// `UnsupportedPlatform` when the debugger was built for a host without a
/// backend (anything other than x86-64 Linux or x86-64 Windows).
///
/// ## Example
///
/// ```rust,no_run
/// use tzdb_core::debugger::create_controller;
///
/// let controller = create_controller()?;
/// assert!(!controller.is_running());
/// # Ok::<(), tzdb_core::DebuggerError>(())
/// ```
pub fn create_controller() -> Result<Box<dyn ProcessController>>
{
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        Ok(Box::new(crate::platform::linux::PtraceController::new()))
    }

    #[cfg(all(windows, target_arch = "x86_64"))]
    {
        Ok(Box::new(crate::platform::windows::WindowsController::new()))
    }

    #[cfg(not(any(
        all(target_os = "linux", target_arch = "x86_64"),
        all(windows, target_arch = "x86_64")
    )))]
    {
        Err(crate::error::DebuggerError::UnsupportedPlatform(format!(
            "{}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )))
    }
}
