//! Error type for the command loop.

use std::io;

use thiserror::Error;
use tzdb_core::DebuggerError;

/// Everything a single command can fail with
///
/// None of these end the loop; the REPL prints `Error: <message>` and reads
/// the next line.
#[derive(Error, Debug)]
pub enum ReplError
{
    /// Missing arguments; carries the command's synopsis
    #[error("usage: {0}")]
    Usage(&'static str),

    /// An address token that is neither `0x`-hex nor a base-prefixed integer
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A value token for `set` that does not parse as an unsigned integer
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Debugger(#[from] DebuggerError),

    /// Writing to the output stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for command execution
pub type Result<T> = std::result::Result<T, ReplError>;
