//! # Symbols
//!
//! Name and address resolution for the target executable.
//!
//! [`BinaryMetadata::load`] opens the executable (ELF or PE, via the `object`
//! crate) once per session and produces two read-only tables:
//!
//! - a [`SymbolTable`] mapping linker names to addresses, used first when a
//!   function name is resolved and for naming backtrace frames;
//! - an optional [`DebugInfo`] index built from DWARF with `gimli`, holding
//!   function entry addresses, global variable locations and (through
//!   `addr2line`) the line table.
//!
//! All addresses in these tables are *file* addresses, as laid out by the
//! linker. The session adds the load bias of position-independent
//! executables before using them in the live process.

pub mod demangle;
mod dwarf;
mod loader;

use std::collections::HashMap;
use std::fmt;

pub use dwarf::{decode_constant_address, DebugInfo, FunctionEntry, VariableEntry, DW_OP_ADDR};
pub use loader::BinaryMetadata;

use crate::types::Address;

/// A `file:line` position from the line table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    pub file: String,
    pub line: Option<u32>,
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file),
            None => f.write_str(&self.file),
        }
    }
}

/// Result of mapping an address back to code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbolization
{
    /// Display name of the containing function
    pub function: String,
    /// Distance from the function's entry address
    pub offset: u64,
    /// Source position, when line info exists
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone)]
struct SymbolEntry
{
    address: Address,
    global: bool,
}

#[derive(Debug, Clone)]
struct CodeRange
{
    start: Address,
    size: u64,
    name: String,
}

/// Linker symbol table: name to address, plus an address-ordered code index
///
/// When a name appears more than once (static functions in different objects),
/// a global definition wins over local ones, and otherwise the first seen is
/// kept.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable
{
    by_name: HashMap<String, SymbolEntry>,
    code: Vec<CodeRange>,
}

impl SymbolTable
{
    /// Create an empty table
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record a symbol
    ///
    /// `code_size` is `Some` for function symbols; those also feed
    /// [`SymbolTable::containing`]. Call [`SymbolTable::finish`] after the last
    /// insertion.
    pub fn insert(&mut self, name: impl Into<String>, address: Address, global: bool, code_size: Option<u64>)
    {
        let name = name.into();
        if let Some(size) = code_size {
            self.code.push(CodeRange {
                start: address,
                size,
                name: name.clone(),
            });
        }

        match self.by_name.get_mut(&name) {
            Some(existing) if global && !existing.global => *existing = SymbolEntry { address, global },
            Some(_) => {}
            None => {
                self.by_name.insert(name, SymbolEntry { address, global });
            }
        }
    }

    /// Sort the code index; required before address lookups
    pub fn finish(&mut self)
    {
        self.code.sort_by_key(|range| range.start);
    }

    /// Address of the symbol named exactly `name`
    pub fn lookup(&self, name: &str) -> Option<Address>
    {
        self.by_name.get(name).map(|entry| entry.address)
    }

    /// Nearest function symbol at or below `address`
    ///
    /// A symbol with a known non-zero size only matches inside its extent. A
    /// zero-size symbol (such as `_init` or `_fini`) extends up to the next
    /// function symbol, and the last one in the table matches nothing past
    /// its own address. Returns the raw symbol name and the offset from its
    /// start.
    pub fn containing(&self, address: Address) -> Option<(&str, u64)>
    {
        let index = self.code.partition_point(|range| range.start <= address);
        let range = self.code.get(index.checked_sub(1)?)?;
        let offset = address.value() - range.start.value();
        let inside = if range.size != 0 {
            offset < range.size
        } else {
            offset == 0 || self.code.get(index).is_some_and(|next| address < next.start)
        };
        inside.then_some((range.name.as_str(), offset))
    }

    /// Number of distinct names
    pub fn len(&self) -> usize
    {
        self.by_name.len()
    }

    /// Whether the table has no symbols
    pub fn is_empty(&self) -> bool
    {
        self.by_name.is_empty()
    }
}
