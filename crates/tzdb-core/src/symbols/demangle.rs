//! Symbol demangling utilities.
//!
//! Symbol tables hold linker names. Rust (`_ZN...E` legacy and `_R` v0)
//! names are demangled for display in backtraces; anything else (C, Go,
//! Itanium C++ that is not Rust) is shown as stored.

use rustc_demangle::try_demangle;

use crate::error::DebuggerError;

/// Human-readable form of a linker symbol name
///
/// Rust names lose their trailing hash (`{:#}` formatting).
///
/// ## Example
///
/// ```rust
/// use tzdb_core::symbols::demangle::display_name;
///
/// assert_eq!(display_name("_ZN4core3fmt5write17h0123456789abcdefE"), "core::fmt::write");
/// assert_eq!(display_name("main.fibonacci"), "main.fibonacci");
/// ```
pub fn display_name(raw: &str) -> String
{
    match try_demangle(raw) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => raw.to_string(),
    }
}

/// Map a gimli DWARF error to a `DebuggerError` with context.
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> DebuggerError
{
    DebuggerError::InvalidBinary(format!("{context}: {err}"))
}
