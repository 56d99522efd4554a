//! # Error Types
//!
//! Every fallible operation in this crate returns [`DebuggerError`].
//!
//! All variants are recoverable at the command-loop boundary: the front-end
//! prints the message and waits for the next command. The only condition that
//! prevents a session from existing at all is [`DebuggerError::UnsupportedPlatform`],
//! returned when no process-control backend exists for the host.

use thiserror::Error;

/// Main error type for debugger operations
///
/// ## Error Categories
///
/// 1. **Lifecycle errors**: NotRunning, SessionActive, NoExecutable, SpawnFailed
/// 2. **Target access errors**: MemoryAccessFailed, TraceFailed
/// 3. **Breakpoint errors**: BreakpointNotFound, BreakpointExists
/// 4. **Symbol errors**: SymbolNotFound, NoDebugInfo, UnsupportedOrNotFound, InvalidBinary
/// 5. **Platform errors**: UnsupportedPlatform
/// 6. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// Operation requires a live target
    ///
    /// Returned by every memory, register, breakpoint and execution-control
    /// operation when no process is being traced (never launched, exited,
    /// killed, or detached).
    #[error("process is not running")]
    NotRunning,

    /// A new target was requested while the current one is still live
    ///
    /// The previous target must be detached or killed first; launching never
    /// abandons a traced process.
    #[error("a process is already being debugged (detach or kill it first)")]
    SessionActive,

    /// `launch` was issued on a session that has no executable path
    #[error("no executable specified")]
    NoExecutable,

    /// The target binary could not be started under trace
    #[error("failed to start process: {0}")]
    SpawnFailed(String),

    /// Reading or writing the target's address space failed
    #[error("memory access at 0x{address:x} failed: {details}")]
    MemoryAccessFailed
    {
        /// First address of the failed access
        address: u64,
        /// OS-level error description
        details: String,
    },

    /// A trace request other than a memory access failed
    ///
    /// Covers resume, single-step, wait and register-context syscalls.
    #[error("{operation} failed: {details}")]
    TraceFailed
    {
        /// Name of the failing request (e.g. `ptrace cont`)
        operation: &'static str,
        /// OS-level error description
        details: String,
    },

    /// No breakpoint is registered at the address
    #[error("no breakpoint at address 0x{0:x}")]
    BreakpointNotFound(u64),

    /// A breakpoint is already registered at the address
    #[error("breakpoint already set at 0x{0:x}")]
    BreakpointExists(u64),

    /// Function name absent from both the symbol table and the debug info
    #[error("function '{0}' not found")]
    SymbolNotFound(String),

    /// Operation requires DWARF debug info and none is loaded
    #[error("no DWARF data loaded")]
    NoDebugInfo,

    /// Variable is absent or its location is not a constant address
    #[error("variable '{0}' not found or unsupported location")]
    UnsupportedOrNotFound(String),

    /// The executable container or its debug sections could not be parsed
    #[error("invalid binary: {0}")]
    InvalidBinary(String),

    /// There is no process-control backend for the host
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Invalid argument passed to a debugger function
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (opening the executable, reading `/proc`, ...)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DebuggerError
{
    /// Build a [`DebuggerError::MemoryAccessFailed`] from any displayable cause.
    pub fn memory(address: impl Into<u64>, details: impl std::fmt::Display) -> Self
    {
        Self::MemoryAccessFailed {
            address: address.into(),
            details: details.to_string(),
        }
    }

    /// Build a [`DebuggerError::TraceFailed`] from any displayable cause.
    pub fn trace(operation: &'static str, details: impl std::fmt::Display) -> Self
    {
        Self::TraceFailed {
            operation,
            details: details.to_string(),
        }
    }
}

/// Result type alias for debugger operations
pub type Result<T> = std::result::Result<T, DebuggerError>;
