//! User-facing descriptions of stop events.

use crate::types::StopReason;

/// Format a [`StopReason`] into a user-facing message.
///
/// ## Example
///
/// ```rust
/// use tzdb_core::events::format_stop_reason;
/// use tzdb_core::types::{Address, StopReason};
///
/// assert_eq!(
///     format_stop_reason(StopReason::Breakpoint(Address::new(0x401000))),
///     "Hit breakpoint at 0x401000"
/// );
/// assert_eq!(format_stop_reason(StopReason::Exited(0)), "Process exited with code: 0");
/// ```
#[must_use]
pub fn format_stop_reason(reason: StopReason) -> String
{
    match reason {
        StopReason::Breakpoint(addr) => format!("Hit breakpoint at {addr}"),
        StopReason::Trap(pc) => format!("Stopped (trap) at {pc}"),
        StopReason::Stepped(pc) => format!("Stepped to {pc}"),
        StopReason::Signal(sig) => format!("Stopped by signal: {}", signal_name(sig)),
        StopReason::Exception(code) => format!("Stopped by exception: 0x{code:08x}"),
        StopReason::Exited(code) => format!("Process exited with code: {code}"),
        StopReason::Terminated(sig) => format!("Process terminated by signal: {}", signal_name(sig)),
    }
}

#[cfg(target_os = "linux")]
fn signal_name(sig: i32) -> String
{
    match nix::sys::signal::Signal::try_from(sig) {
        Ok(signal) => format!("{} ({sig})", signal.as_str()),
        Err(_) => sig.to_string(),
    }
}

#[cfg(not(target_os = "linux"))]
fn signal_name(sig: i32) -> String
{
    sig.to_string()
}
