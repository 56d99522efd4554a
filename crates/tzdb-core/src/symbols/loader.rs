//! Executable container parsing.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{RunTimeEndian, SectionId};
use object::{BinaryFormat, Object, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};

use super::demangle::display_name;
use super::dwarf::DwarfSections;
use super::{DebugInfo, SourceLocation, SymbolTable, Symbolization};
use crate::error::{DebuggerError, Result};
use crate::types::Address;

const PAGE_SIZE: u64 = 0x1000;

/// DWARF sections read from the file, by canonical ELF name and its aliases
///
/// PE images produced by MinGW and Go keep the ELF names; long names may be
/// truncated to `/n` string-table references, which `object` resolves.
const DWARF_SECTIONS: &[(SectionId, &[&str])] = &[
    (SectionId::DebugAbbrev, &[".debug_abbrev", ".zdebug_abbrev"]),
    (SectionId::DebugAddr, &[".debug_addr"]),
    (SectionId::DebugInfo, &[".debug_info", ".zdebug_info"]),
    (SectionId::DebugLine, &[".debug_line", ".zdebug_line"]),
    (SectionId::DebugLineStr, &[".debug_line_str"]),
    (SectionId::DebugRanges, &[".debug_ranges", ".zdebug_ranges"]),
    (SectionId::DebugRngLists, &[".debug_rnglists"]),
    (SectionId::DebugStr, &[".debug_str", ".zdebug_str"]),
    (SectionId::DebugStrOffsets, &[".debug_str_offsets"]),
    (SectionId::DebugLoc, &[".debug_loc", ".zdebug_loc"]),
    (SectionId::DebugLocLists, &[".debug_loclists"]),
];

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> Result<Option<Arc<[u8]>>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section
                .uncompressed_data()
                .map_err(|err| DebuggerError::InvalidBinary(format!("failed to read {name}: {err}")))?;
            return Ok(Some(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
                Cow::Owned(vec) => vec.into(),
            }));
        }
    }
    Ok(None)
}

/// Read-only metadata of one executable: symbols, debug info and layout
///
/// ## Example
///
/// ```rust,no_run
/// use tzdb_core::symbols::BinaryMetadata;
///
/// let metadata = BinaryMetadata::load("./testprog")?;
/// if let Some(main) = metadata.symbols().lookup("main") {
///     println!("main is at {main}");
/// }
/// # Ok::<(), tzdb_core::DebuggerError>(())
/// ```
#[derive(Debug, Default)]
pub struct BinaryMetadata
{
    path: PathBuf,
    symbols: SymbolTable,
    debug_info: Option<DebugInfo>,
    preferred_base: Address,
}

impl BinaryMetadata
{
    /// Load symbols and DWARF from `path`, requiring debug info
    ///
    /// ## Errors
    ///
    /// - `Io`: the file cannot be read
    /// - `InvalidBinary`: not a parseable ELF/PE file, or malformed DWARF
    /// - `NoDebugInfo`: the file carries no `.debug_info` section
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {
        let metadata = Self::load_optional_debug_info(path)?;
        if metadata.debug_info.is_none() {
            return Err(DebuggerError::NoDebugInfo);
        }
        Ok(metadata)
    }

    /// Load symbols and, when present, DWARF from `path`
    ///
    /// A missing `.debug_info` section yields metadata without debug info
    /// instead of an error. Symbol enumeration never fails the load.
    pub fn load_optional_debug_info(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let file = object::File::parse(&*bytes)
            .map_err(|err| DebuggerError::InvalidBinary(format!("failed to parse {}: {err}", path.display())))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let symbols = read_symbols(&file);
        let preferred_base = match file.format() {
            BinaryFormat::Pe => Address::new(file.relative_address_base()),
            _ => file
                .segments()
                .filter(|segment| segment.size() > 0)
                .map(|segment| segment.address())
                .min()
                .map_or(Address::ZERO, |lowest| Address::new(lowest).align_down(PAGE_SIZE)),
        };

        let mut sections = HashMap::new();
        for (id, names) in DWARF_SECTIONS {
            if let Some(data) = load_section_bytes(&file, names)? {
                sections.insert(*id, data);
            }
        }
        let has_debug_info = sections.get(&SectionId::DebugInfo).is_some_and(|info| !info.is_empty());
        let debug_info = if has_debug_info {
            Some(DebugInfo::parse(DwarfSections::new(sections, endian))?)
        } else {
            None
        };

        tracing::info!(
            path = %path.display(),
            symbols = symbols.len(),
            debug_info = debug_info.is_some(),
            preferred_base = %preferred_base,
            "loaded binary metadata"
        );

        Ok(Self {
            path: path.to_path_buf(),
            symbols,
            debug_info,
            preferred_base,
        })
    }

    /// Assemble metadata from prepared tables
    pub fn from_parts(symbols: SymbolTable, debug_info: Option<DebugInfo>) -> Self
    {
        Self {
            path: PathBuf::new(),
            symbols,
            debug_info,
            preferred_base: Address::ZERO,
        }
    }

    /// Path the metadata was loaded from (empty for assembled metadata)
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// The linker symbol table
    pub fn symbols(&self) -> &SymbolTable
    {
        &self.symbols
    }

    /// The DWARF index, when the executable has debug info
    pub fn debug_info(&self) -> Option<&DebugInfo>
    {
        self.debug_info.as_ref()
    }

    /// Address the image was linked to load at
    ///
    /// The PE `ImageBase`, or the page-aligned lowest ELF segment address.
    pub fn preferred_base(&self) -> Address
    {
        self.preferred_base
    }

    /// Map an unrelocated code address to its function and source position
    ///
    /// Symbol-table names are preferred; DWARF function ranges are used for
    /// binaries whose symbol table was stripped.
    pub fn symbolize(&self, address: Address) -> Option<Symbolization>
    {
        let location: Option<SourceLocation> = self.debug_info.as_ref().and_then(|info| info.location(address));

        if let Some((name, offset)) = self.symbols.containing(address) {
            return Some(Symbolization {
                function: display_name(name),
                offset,
                location,
            });
        }

        let function = self.debug_info.as_ref()?.function_containing(address)?;
        Some(Symbolization {
            function: display_name(&function.name),
            offset: address.value() - function.low_pc.value(),
            location,
        })
    }
}

fn read_symbols(file: &object::File<'_>) -> SymbolTable
{
    let mut table = SymbolTable::new();
    for symbol in file.symbols() {
        if symbol.is_undefined() || symbol.address() == 0 {
            continue;
        }
        let name = match symbol.name() {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Skipping unreadable symbol name: {}", e);
                continue;
            }
        };
        let code_size = (symbol.kind() == SymbolKind::Text).then(|| symbol.size());
        table.insert(name, Address::new(symbol.address()), symbol.is_global(), code_size);
    }
    table.finish();
    table
}
