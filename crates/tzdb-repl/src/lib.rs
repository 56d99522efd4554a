//! # tzdb-repl
//!
//! Line-oriented front-end for the tzdb debugger.
//!
//! The crate parses the command grammar ([`command`]), drives a
//! [`tzdb_core::DebugSession`] from it ([`repl`]) and renders results as text
//! ([`format`]). It never touches stdin or stdout directly: the loop reads any
//! [`std::io::BufRead`] and writes any [`std::io::Write`], which is what the
//! binary and the tests plug in.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::io;
//!
//! use tzdb_repl::{HostSessionFactory, Repl};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut repl = Repl::new(HostSessionFactory, io::stdout().lock())?;
//! repl.run(io::stdin().lock())?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod format;
pub mod repl;

pub use command::Command;
pub use error::ReplError;
pub use repl::{Flow, HostSessionFactory, Repl, SessionFactory};
