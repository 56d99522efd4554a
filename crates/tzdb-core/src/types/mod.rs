//! # Types
//!
//! Platform-agnostic types shared by the backends, the breakpoint manager and
//! the session.
//!
//! These types hide the OS-specific representations (`user_regs_struct` on
//! Linux, `CONTEXT` on Windows, `waitpid` statuses versus debug events) so the
//! rest of the debugger works with one vocabulary.

pub mod address;
pub mod process;
pub mod registers;

pub use address::Address;
pub use process::{ProcessId, StopReason};
pub use registers::{Registers, X86_64Register};
