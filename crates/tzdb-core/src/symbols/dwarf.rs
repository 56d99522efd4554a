//! DWARF function and variable index.
//!
//! The index is built eagerly when the executable is loaded: every compilation
//! unit is walked once and each named `DW_TAG_subprogram` with a `DW_AT_low_pc`
//! and each named `DW_TAG_variable` with a location becomes an entry. Source
//! line lookups go through `addr2line`, which is initialised on first use.

use std::collections::HashMap;
use std::sync::Arc;

use addr2line::Context;
use gimli::{constants, AttributeValue, DebuggingInformationEntry, Dwarf, EndianArcSlice, Reader, RunTimeEndian, SectionId, Unit};
use once_cell::sync::OnceCell;

use super::demangle::map_dwarf_error;
use super::SourceLocation;
use crate::error::Result;
use crate::types::Address;

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;

/// `DW_OP_addr`: the only location expression opcode the debugger evaluates
pub const DW_OP_ADDR: u8 = constants::DW_OP_addr.0;

/// Length of a `DW_OP_addr` expression on a 64-bit target (opcode + address)
const CONSTANT_ADDRESS_EXPR_LEN: usize = 9;

/// A function described by the debug info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry
{
    /// `DW_AT_name` (or the linkage name when there is no plain name)
    pub name: String,
    /// Entry address (`DW_AT_low_pc`), unrelocated
    pub low_pc: Address,
    /// End of the function's code, when `DW_AT_high_pc` is present
    pub high_pc: Option<Address>,
}

impl FunctionEntry
{
    fn contains(&self, address: Address) -> bool
    {
        self.high_pc
            .is_some_and(|high| self.low_pc <= address && address < high)
    }
}

/// A variable described by the debug info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableEntry
{
    /// `DW_AT_name`
    pub name: String,
    /// Raw `DW_AT_location` expression bytes; empty for location lists
    pub location: Vec<u8>,
}

/// Decode a constant-address location expression
///
/// Accepts `DW_OP_addr` followed by at least 8 little-endian address bytes and
/// rejects every other form.
///
/// ## Example
///
/// ```rust
/// use tzdb_core::symbols::{decode_constant_address, DW_OP_ADDR};
/// use tzdb_core::types::Address;
///
/// let mut expr = vec![DW_OP_ADDR];
/// expr.extend_from_slice(&0x4c_5000u64.to_le_bytes());
/// assert_eq!(decode_constant_address(&expr), Some(Address::new(0x4c_5000)));
///
/// // DW_OP_fbreg -16: frame-relative, not supported
/// assert_eq!(decode_constant_address(&[0x91, 0x70]), None);
/// ```
pub fn decode_constant_address(expr: &[u8]) -> Option<Address>
{
    if expr.len() < CONSTANT_ADDRESS_EXPR_LEN || expr[0] != DW_OP_ADDR {
        return None;
    }
    let bytes: [u8; 8] = expr[1..CONSTANT_ADDRESS_EXPR_LEN].try_into().ok()?;
    Some(Address::new(u64::from_le_bytes(bytes)))
}

/// Functions and variables indexed from the executable's DWARF sections
pub struct DebugInfo
{
    functions: Vec<FunctionEntry>,
    variables: Vec<VariableEntry>,
    sections: Option<DwarfSections>,
    lines: OnceCell<Option<Context<OwnedReader>>>,
}

/// Raw section contents kept so `addr2line` can build its own `Dwarf`
pub(crate) struct DwarfSections
{
    data: HashMap<SectionId, Arc<[u8]>>,
    endian: RunTimeEndian,
}

impl DwarfSections
{
    pub(crate) fn new(data: HashMap<SectionId, Arc<[u8]>>, endian: RunTimeEndian) -> Self
    {
        Self { data, endian }
    }

    fn load(&self) -> Result<OwnedDwarf>
    {
        Dwarf::load(|section| Ok::<_, gimli::Error>(self.reader(section)))
            .map_err(|err| map_dwarf_error("loading DWARF sections", err))
    }

    fn reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .data
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }
}

impl DebugInfo
{
    /// Build the index from raw DWARF sections
    ///
    /// Fails atomically: a malformed unit aborts the whole load.
    pub(crate) fn parse(sections: DwarfSections) -> Result<Self>
    {
        let dwarf = sections.load()?;
        let mut functions = Vec::new();
        let mut variables = Vec::new();

        let mut headers = dwarf.units();
        while let Some(header) = headers
            .next()
            .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
        {
            let unit = dwarf
                .unit(header)
                .map_err(|err| map_dwarf_error("parsing compilation unit", err))?;
            index_unit(&dwarf, &unit, &mut functions, &mut variables)?;
        }

        tracing::debug!(
            functions = functions.len(),
            variables = variables.len(),
            "indexed DWARF debug info"
        );

        Ok(Self {
            functions,
            variables,
            sections: Some(sections),
            lines: OnceCell::new(),
        })
    }

    /// Build an index from already-decoded entries
    ///
    /// No line table is available for such an index.
    pub fn from_entries(functions: Vec<FunctionEntry>, variables: Vec<VariableEntry>) -> Self
    {
        Self {
            functions,
            variables,
            sections: None,
            lines: OnceCell::new(),
        }
    }

    /// Indexed functions, in DWARF order
    pub fn functions(&self) -> &[FunctionEntry]
    {
        &self.functions
    }

    /// First function named exactly `name`
    pub fn find_function(&self, name: &str) -> Option<&FunctionEntry>
    {
        self.functions.iter().find(|function| function.name == name)
    }

    /// Address of the first variable named `name` whose location is a constant address
    pub fn find_variable_address(&self, name: &str) -> Option<Address>
    {
        self.variables
            .iter()
            .filter(|variable| variable.name == name)
            .find_map(|variable| decode_constant_address(&variable.location))
    }

    /// Function whose `[low_pc, high_pc)` range contains `address`
    pub fn function_containing(&self, address: Address) -> Option<&FunctionEntry>
    {
        self.functions.iter().find(|function| function.contains(address))
    }

    /// Source location for an unrelocated address, from the line table
    pub fn location(&self, address: Address) -> Option<SourceLocation>
    {
        let context = self
            .lines
            .get_or_init(|| {
                let dwarf = self.sections.as_ref()?.load().ok()?;
                match Context::from_dwarf(dwarf) {
                    Ok(context) => Some(context),
                    Err(err) => {
                        tracing::warn!("Failed to build line table context: {}", err);
                        None
                    }
                }
            })
            .as_ref()?;

        let location = context.find_location(address.value()).ok()??;
        Some(SourceLocation {
            file: location.file?.to_string(),
            line: location.line,
        })
    }
}

impl std::fmt::Debug for DebugInfo
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("DebugInfo")
            .field("functions", &self.functions.len())
            .field("variables", &self.variables.len())
            .field("has_line_info", &self.sections.is_some())
            .finish()
    }
}

fn index_unit(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    functions: &mut Vec<FunctionEntry>,
    variables: &mut Vec<VariableEntry>,
) -> Result<()>
{
    let mut cursor = unit.entries();
    while let Some((_delta, entry)) = cursor.next_dfs().map_err(|err| map_dwarf_error("traversing DIE tree", err))? {
        match entry.tag() {
            constants::DW_TAG_subprogram => {
                let Some(name) = entry_name(dwarf, unit, entry)? else {
                    continue;
                };
                let Some(low_pc) = attr_address(dwarf, unit, entry, constants::DW_AT_low_pc)? else {
                    continue;
                };
                let high_pc = match entry
                    .attr_value(constants::DW_AT_high_pc)
                    .map_err(|err| map_dwarf_error("reading DW_AT_high_pc", err))?
                {
                    Some(AttributeValue::Udata(length)) => low_pc.checked_add(length),
                    Some(value) => dwarf
                        .attr_address(unit, value)
                        .map_err(|err| map_dwarf_error("resolving DW_AT_high_pc", err))?
                        .map(Address::new),
                    None => None,
                };
                functions.push(FunctionEntry { name, low_pc, high_pc });
            }
            constants::DW_TAG_variable => {
                let Some(name) = entry_name(dwarf, unit, entry)? else {
                    continue;
                };
                let location = match entry
                    .attr_value(constants::DW_AT_location)
                    .map_err(|err| map_dwarf_error("reading DW_AT_location", err))?
                {
                    Some(AttributeValue::Exprloc(expr)) => expr_bytes(&expr.0)?,
                    Some(AttributeValue::Block(block)) => expr_bytes(&block)?,
                    Some(_) => Vec::new(),
                    None => continue,
                };
                variables.push(VariableEntry { name, location });
            }
            _ => {}
        }
    }
    Ok(())
}

fn entry_name(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
) -> Result<Option<String>>
{
    for name_attr in [constants::DW_AT_name, constants::DW_AT_linkage_name] {
        if let Some(attr) = entry
            .attr(name_attr)
            .map_err(|err| map_dwarf_error("reading name attribute", err))?
        {
            let reader = dwarf
                .attr_string(unit, attr.value())
                .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
            let name = reader
                .to_string_lossy()
                .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
                .into_owned();
            return Ok(Some(name));
        }
    }
    Ok(None)
}

fn attr_address(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    name: constants::DwAt,
) -> Result<Option<Address>>
{
    let Some(value) = entry
        .attr_value(name)
        .map_err(|err| map_dwarf_error("reading address attribute", err))?
    else {
        return Ok(None);
    };
    let address = dwarf
        .attr_address(unit, value)
        .map_err(|err| map_dwarf_error("resolving address attribute", err))?;
    Ok(address.map(Address::new))
}

fn expr_bytes(reader: &OwnedReader) -> Result<Vec<u8>>
{
    let bytes = reader
        .to_slice()
        .map_err(|err| map_dwarf_error("reading location expression", err))?;
    Ok(bytes.into_owned())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn addr_expr(address: u64) -> Vec<u8>
    {
        let mut expr = vec![DW_OP_ADDR];
        expr.extend_from_slice(&address.to_le_bytes());
        expr
    }

    #[test]
    fn test_decode_constant_address_little_endian()
    {
        let expr = [0x03, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode_constant_address(&expr), Some(Address::new(0x1234_5678)));
    }

    #[test]
    fn test_decode_constant_address_rejects_wrong_tag()
    {
        let mut expr = addr_expr(0x4000);
        expr[0] = constants::DW_OP_fbreg.0;
        assert_eq!(decode_constant_address(&expr), None);
    }

    #[test]
    fn test_decode_constant_address_rejects_short_expression()
    {
        let expr = addr_expr(0x4000);
        assert_eq!(decode_constant_address(&expr[..8]), None);
        assert_eq!(decode_constant_address(&[]), None);
    }

    #[test]
    fn test_find_variable_skips_unsupported_duplicates()
    {
        let info = DebugInfo::from_entries(
            Vec::new(),
            vec![
                VariableEntry {
                    name: "counter".into(),
                    location: vec![constants::DW_OP_fbreg.0, 0x70],
                },
                VariableEntry {
                    name: "counter".into(),
                    location: addr_expr(0x60_1040),
                },
            ],
        );

        assert_eq!(info.find_variable_address("counter"), Some(Address::new(0x60_1040)));
        assert_eq!(info.find_variable_address("missing"), None);
    }

    #[test]
    fn test_function_containing_uses_half_open_range()
    {
        let info = DebugInfo::from_entries(
            vec![FunctionEntry {
                name: "main".into(),
                low_pc: Address::new(0x1000),
                high_pc: Some(Address::new(0x1040)),
            }],
            Vec::new(),
        );

        assert!(info.function_containing(Address::new(0x1000)).is_some());
        assert!(info.function_containing(Address::new(0x103f)).is_some());
        assert!(info.function_containing(Address::new(0x1040)).is_none());
        assert!(info.location(Address::new(0x1000)).is_none());
    }
}
