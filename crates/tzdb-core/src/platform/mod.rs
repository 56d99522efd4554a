//! # Platform-Specific Implementations
//!
//! Each supported host has its own submodule implementing
//! [`ProcessController`](crate::debugger::ProcessController) with that
//! platform's native debugging API:
//!
//! - **Linux**: the `ptrace` system call
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - **Windows**: the Win32 debug-event API
//!   - See: [Windows Debugging API](https://docs.microsoft.com/en-us/windows/win32/debug/debugging-functions)
//!
//! Only the module for the compilation target is built.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;

#[cfg(all(windows, target_arch = "x86_64"))]
pub mod windows;
