//! Common module for library exports

pub use crate::breakpoints::{Breakpoint, BreakpointManager};
pub use crate::debugger::{MemoryAccess, ProcessController, RegisterAccess};
pub use crate::error::{DebuggerError, Result};
pub use crate::events::format_stop_reason;
pub use crate::session::DebugSession;
pub use crate::symbols::{BinaryMetadata, Symbolization};
pub use crate::types::address::Address;
pub use crate::types::process::{ProcessId, StopReason};
pub use crate::types::registers::{Registers, X86_64Register};
pub use crate::unwind::{Backtrace, StackFrame};
