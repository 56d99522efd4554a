//! Text rendering for command output.

use std::fmt::Write as _;

use tzdb_core::breakpoints::Breakpoint;
use tzdb_core::unwind::StackFrame;
use tzdb_core::{Address, Registers};

const BYTES_PER_ROW: usize = 16;

/// Hex and ASCII dump, 16 bytes per row with a gap after the eighth
///
/// ```text
/// Memory dump at 0x1000:
/// 00001000: 48 65 6c 6c 6f 00 00 00  01 02 03 04 05 06 07 08  |Hello...........|
/// ```
pub fn hex_dump(start: Address, data: &[u8]) -> String
{
    let mut out = format!("Memory dump at {start}:\n");

    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        let _ = write!(out, "{:08x}: ", start.value().wrapping_add((row * BYTES_PER_ROW) as u64));

        for column in 0..BYTES_PER_ROW {
            if column == 8 {
                out.push(' ');
            }
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
        }

        out.push_str(" |");
        out.extend(chunk.iter().map(|&byte| printable(byte)));
        out.push_str("|\n");
    }
    out
}

fn printable(byte: u8) -> char
{
    if (32..=126).contains(&byte) {
        char::from(byte)
    } else {
        '.'
    }
}

/// Bytes as space-terminated hex pairs, as printed by `print`
pub fn hex_bytes(data: &[u8]) -> String
{
    data.iter().fold(String::with_capacity(data.len() * 3), |mut out, byte| {
        let _ = write!(out, "{byte:02x} ");
        out
    })
}

/// One `name: value` line per register, in display order
pub fn registers(regs: &Registers) -> String
{
    let mut out = String::from("Registers:\n");
    for (register, value) in regs.iter() {
        let _ = writeln!(out, "  {}: 0x{value:016x}", register.name());
    }
    out
}

/// `0x401136 in main+0x12 at src/main.rs:7`, or just the address when unsymbolised
pub fn frame(frame: &StackFrame) -> String
{
    let Some(symbol) = &frame.symbol else {
        return format!("{} in ??", frame.pc);
    };

    let mut out = format!("{} in {}", frame.pc, symbol.function);
    if symbol.offset != 0 {
        let _ = write!(out, "+0x{:x}", symbol.offset);
    }
    if let Some(location) = &symbol.location {
        let _ = write!(out, " at {location}");
    }
    out
}

/// Breakpoint table with enabled state, or a note that it is empty
pub fn breakpoint_list<'a>(breakpoints: impl IntoIterator<Item = &'a Breakpoint>) -> String
{
    let mut lines: Vec<String> = breakpoints
        .into_iter()
        .map(|bp| {
            let status = if bp.is_enabled() { "enabled" } else { "disabled" };
            format!("  {} ({status})", bp.address())
        })
        .collect();

    if lines.is_empty() {
        return "No breakpoints set\n".to_string();
    }
    lines.insert(0, "Breakpoints:".to_string());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests
{
    use tzdb_core::symbols::{SourceLocation, Symbolization};
    use tzdb_core::types::X86_64Register;

    use super::*;

    #[test]
    fn test_hex_dump_full_row()
    {
        let data: Vec<u8> = b"Hello, debugger!".to_vec();
        let dump = hex_dump(Address::new(0x1000), &data);
        assert_eq!(
            dump,
            "Memory dump at 0x1000:\n\
             00001000: 48 65 6c 6c 6f 2c 20 64  65 62 75 67 67 65 72 21  |Hello, debugger!|\n"
        );
    }

    #[test]
    fn test_hex_dump_partial_row_is_padded()
    {
        let dump = hex_dump(Address::new(0x10), &[0x00, 0x41, 0x7f]);
        let row = dump.lines().nth(1).unwrap();
        // 3 bytes, 13 blanks and the mid-row gap keep the ASCII column aligned
        assert_eq!(row, format!("00000010: 00 41 7f {}  |.A.|", "   ".repeat(13)));
    }

    #[test]
    fn test_hex_dump_second_row_address()
    {
        let data = [0xCCu8; 20];
        let dump = hex_dump(Address::new(0x401000), &data);
        let rows: Vec<&str> = dump.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[2].starts_with("00401010: cc cc cc cc "));
    }

    #[test]
    fn test_hex_dump_empty()
    {
        assert_eq!(hex_dump(Address::new(0x1000), &[]), "Memory dump at 0x1000:\n");
    }

    #[test]
    fn test_hex_bytes()
    {
        assert_eq!(hex_bytes(&[0x2a, 0, 0, 0]), "2a 00 00 00 ");
        assert_eq!(hex_bytes(&[]), "");
    }

    #[test]
    fn test_registers_rendering()
    {
        let mut regs = Registers::new();
        regs.set(X86_64Register::Rip, 0x401136);
        let text = registers(&regs);
        assert!(text.starts_with("Registers:\n  rax: 0x0000000000000000\n"));
        assert!(text.contains("  rip: 0x0000000000401136\n"));
        assert_eq!(text.lines().count(), X86_64Register::ALL.len() + 1);
    }

    #[test]
    fn test_frame_rendering()
    {
        let bare = StackFrame {
            index: 0,
            pc: Address::new(0x401136),
            symbol: None,
        };
        assert_eq!(frame(&bare), "0x401136 in ??");

        let at_entry = StackFrame {
            index: 1,
            pc: Address::new(0x401100),
            symbol: Some(Symbolization {
                function: "main".to_string(),
                offset: 0,
                location: None,
            }),
        };
        assert_eq!(frame(&at_entry), "0x401100 in main");

        let inside = StackFrame {
            index: 1,
            pc: Address::new(0x401112),
            symbol: Some(Symbolization {
                function: "fib".to_string(),
                offset: 0x12,
                location: Some(SourceLocation {
                    file: "src/main.rs".to_string(),
                    line: Some(7),
                }),
            }),
        };
        assert_eq!(frame(&inside), "0x401112 in fib+0x12 at src/main.rs:7");
    }

    #[test]
    fn test_empty_breakpoint_list()
    {
        assert_eq!(breakpoint_list(std::iter::empty()), "No breakpoints set\n");
    }
}
