//! # tzdb Utilities
//!
//! Shared logging setup for the tzdb workspace.
//!
//! This crate configures the `tracing` subscriber used by the debugger binary.
//! Library crates only emit events through `tracing` macros; initialising the
//! subscriber is left to the executable.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
