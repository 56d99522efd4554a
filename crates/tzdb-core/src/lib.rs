//! # tzdb-core
//!
//! Process control, breakpoints and symbol resolution for the tzdb debugger.
//!
//! This crate provides everything below the command line:
//! - Launching a program under trace and driving it (continue, single-step, kill, detach)
//! - Register and memory inspection of the stopped target
//! - Software breakpoints with step-over and automatic re-arming
//! - Function and global-variable resolution from the symbol table and DWARF
//! - Frame-pointer backtraces with source locations
//!
//! ## Platform Support
//!
//! - **Linux x86-64**: `ptrace(2)` via the `nix` crate
//! - **Windows x86-64**: the Win32 debug-event API via `windows-sys`
//!
//! Other hosts build, but [`debugger::create_controller`] reports
//! `UnsupportedPlatform`.
//!
//! ## Why unsafe code is needed
//!
//! The Windows backend calls Win32 debug functions directly, and handing a
//! `pre_exec` hook to the child on Linux is an unsafe contract. Both are
//! wrapped in safe abstractions; nothing outside `platform` is unsafe.

#![allow(unsafe_code)] // Required for low-level system APIs (ptrace pre_exec, Win32 debug API)

pub mod breakpoints;
pub mod debugger;
pub mod error;
pub mod events;
#[cfg(any(target_os = "linux", test))]
pub mod memory;
pub mod platform;
pub mod prelude;
pub mod session;
pub mod symbols;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod unwind;

pub use debugger::{create_controller, MemoryAccess, ProcessController, RegisterAccess};
// Re-export commonly used types
pub use error::{DebuggerError, Result};
pub use session::DebugSession;
pub use types::{Address, ProcessId, Registers, StopReason};
