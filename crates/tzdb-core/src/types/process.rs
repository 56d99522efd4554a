//! Process identifier and stop classification.

use std::fmt;

use super::Address;

/// Process identifier (PID)
///
/// Both supported hosts use 32-bit process identifiers (`pid_t` on Linux,
/// `DWORD` process IDs on Windows).
///
/// ## Example
///
/// ```rust
/// use tzdb_core::types::ProcessId;
///
/// let pid = ProcessId::from(4242);
/// assert_eq!(u32::from(pid), 4242);
/// assert_eq!(pid.to_string(), "4242");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Why the target stopped after a resume or single-step
///
/// Backends report the raw classification of the trace-stop event
/// ([`Trap`](StopReason::Trap), [`Stepped`](StopReason::Stepped),
/// [`Signal`](StopReason::Signal), [`Exception`](StopReason::Exception),
/// [`Exited`](StopReason::Exited), [`Terminated`](StopReason::Terminated)).
/// The session then turns a `Trap` into a [`Breakpoint`](StopReason::Breakpoint)
/// when the trap was raised by one of its installed breakpoints.
///
/// ## State Transitions
///
/// - `Breakpoint`, `Trap`, `Stepped`, `Signal`, `Exception`: the target is
///   stopped and still traced; it can be inspected and resumed.
/// - `Exited`, `Terminated`: the target is gone; no further operation is valid
///   until a new launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason
{
    /// Hit an installed breakpoint
    ///
    /// The address is the breakpoint address. The original instruction byte
    /// has been restored and the instruction pointer rewound to it.
    Breakpoint(Address),
    /// Trap that no installed breakpoint accounts for
    ///
    /// The address is the instruction pointer as reported, i.e. one byte past
    /// the trap opcode for an `int3`.
    Trap(Address),
    /// A single-step completed; the address is the new instruction pointer
    Stepped(Address),
    /// Stopped by a POSIX signal other than `SIGTRAP`
    ///
    /// The signal is delivered to the target on the next resume.
    Signal(i32),
    /// Stopped by a Windows first-chance exception other than a breakpoint
    ///
    /// The exception is passed back to the target unhandled on the next resume.
    Exception(u32),
    /// Process exited with status code
    Exited(i32),
    /// Process was terminated by a signal
    Terminated(i32),
}

impl StopReason
{
    /// Whether the target is gone after this stop
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tzdb_core::types::{Address, StopReason};
    ///
    /// assert!(StopReason::Exited(0).is_terminal());
    /// assert!(!StopReason::Trap(Address::new(0x1001)).is_terminal());
    /// ```
    pub const fn is_terminal(self) -> bool
    {
        matches!(self, StopReason::Exited(_) | StopReason::Terminated(_))
    }
}
