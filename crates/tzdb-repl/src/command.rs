//! # Command Grammar
//!
//! One command per line, tokens separated by whitespace. Command names are
//! case-sensitive; every command has the aliases listed in [`HELP`].
//!
//! Addresses for `delete` and `memory` and values for `set` accept the usual
//! integer prefixes (`0x` hex, `0o` or a leading `0` octal, `0b` binary,
//! otherwise decimal). `break` treats a `0x`-prefixed token as an address and
//! anything else as a function name.

use std::path::PathBuf;

use tzdb_core::Address;

use crate::error::{ReplError, Result};

/// Default byte count for `memory`
pub const DEFAULT_DUMP_SIZE: usize = 16;

/// Default byte count for `print`
pub const DEFAULT_PRINT_SIZE: usize = 8;

/// Text printed by `help`
pub const HELP: &str = "\
Available commands:
  help, h                      - Show this help message
  launch, l <program> [args]   - Launch a program for debugging
  continue, c                  - Continue execution
  break, b <addr|func>         - Set a breakpoint
  delete, d <addr>             - Remove a breakpoint
  step, s                      - Execute one instruction
  registers, regs, r           - Show register values
  memory, mem, x <addr> [size] - Show memory contents
  stack, bt                    - Show stack trace
  breakpoints, info            - List all breakpoints
  print, printvar <var> [size] - Show the bytes of a global variable
  set, setvar <var> <value>    - Write a 64-bit value to a global variable
  detach                       - Detach from process
  kill                         - Kill the process
  quit, q, exit                - Exit debugger

Examples:
  launch ./myprogram arg1 arg2
  break main
  break 0x401000
  memory 0x7fff12345678 32
  print counter
  set counter 0x2a";

/// Where a `break` command should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakTarget
{
    Address(Address),
    Function(String),
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command
{
    Help,
    Launch
    {
        program: PathBuf,
        args: Vec<String>,
    },
    Continue,
    Break(BreakTarget),
    Delete(Address),
    Step,
    Registers,
    Memory
    {
        address: Address,
        size: usize,
    },
    Stack,
    Breakpoints,
    Print
    {
        name: String,
        size: usize,
    },
    Set
    {
        name: String,
        value: u64,
    },
    Detach,
    Kill,
    Quit,
}

impl Command
{
    /// Parse one input line
    ///
    /// Returns `Ok(None)` for a blank line.
    ///
    /// ## Errors
    ///
    /// - `UnknownCommand`: the first token is not a command or alias
    /// - `Usage`: required arguments are missing
    /// - `InvalidAddress` / `InvalidValue`: a numeric argument does not parse
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tzdb_core::Address;
    /// use tzdb_repl::command::Command;
    ///
    /// let command = Command::parse("x 0x1000 32")?;
    /// assert_eq!(
    ///     command,
    ///     Some(Command::Memory {
    ///         address: Address::new(0x1000),
    ///         size: 32
    ///     })
    /// );
    /// # Ok::<(), tzdb_repl::ReplError>(())
    /// ```
    pub fn parse(line: &str) -> Result<Option<Self>>
    {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = tokens.collect();

        let command = match name {
            "help" | "h" => Self::Help,
            "launch" | "l" => {
                let (program, rest) = args.split_first().ok_or(ReplError::Usage("launch <program> [args...]"))?;
                Self::Launch {
                    program: PathBuf::from(program),
                    args: rest.iter().map(ToString::to_string).collect(),
                }
            }
            "continue" | "c" => Self::Continue,
            "break" | "b" => {
                let target = args.first().ok_or(ReplError::Usage("break <address|function>"))?;
                Self::Break(parse_break_target(target)?)
            }
            "delete" | "d" => {
                let target = args.first().ok_or(ReplError::Usage("delete <address>"))?;
                Self::Delete(parse_address(target)?)
            }
            "step" | "s" => Self::Step,
            "registers" | "regs" | "r" => Self::Registers,
            "memory" | "mem" | "x" => {
                let target = args.first().ok_or(ReplError::Usage("memory <address> [size]"))?;
                Self::Memory {
                    address: parse_address(target)?,
                    size: parse_size(args.get(1), DEFAULT_DUMP_SIZE),
                }
            }
            "stack" | "bt" => Self::Stack,
            "breakpoints" | "info" => Self::Breakpoints,
            "print" | "printvar" => {
                let name = args.first().ok_or(ReplError::Usage("print <varname> [size]"))?;
                Self::Print {
                    name: (*name).to_string(),
                    size: parse_size(args.get(1), DEFAULT_PRINT_SIZE),
                }
            }
            "set" | "setvar" => {
                let [name, value, ..] = args.as_slice() else {
                    return Err(ReplError::Usage("set <varname> <value>"));
                };
                Self::Set {
                    name: (*name).to_string(),
                    value: parse_u64_auto(value).ok_or_else(|| ReplError::InvalidValue((*value).to_string()))?,
                }
            }
            "detach" => Self::Detach,
            "kill" => Self::Kill,
            "quit" | "q" | "exit" => Self::Quit,
            other => return Err(ReplError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// Parse an unsigned integer, picking the radix from its prefix
///
/// `0x`/`0X` is hex, `0o`/`0O` or a bare leading `0` is octal, `0b`/`0B` is
/// binary, anything else decimal. Signs are rejected.
pub fn parse_u64_auto(text: &str) -> Option<u64>
{
    let (digits, radix) = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        (rest, 8)
    } else if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        (rest, 2)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

fn parse_address(text: &str) -> Result<Address>
{
    parse_u64_auto(text)
        .map(Address::new)
        .ok_or_else(|| ReplError::InvalidAddress(text.to_string()))
}

fn parse_break_target(text: &str) -> Result<BreakTarget>
{
    match text.strip_prefix("0x") {
        Some(hex) if !hex.starts_with(['+', '-']) => u64::from_str_radix(hex, 16)
            .map(|value| BreakTarget::Address(Address::new(value)))
            .map_err(|_| ReplError::InvalidAddress(text.to_string())),
        Some(_) => Err(ReplError::InvalidAddress(text.to_string())),
        None => Ok(BreakTarget::Function(text.to_string())),
    }
}

/// Optional size argument; anything unparsable falls back to `default`
fn parse_size(text: Option<&&str>, default: usize) -> usize
{
    text.and_then(|size| size.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn parse(line: &str) -> Command
    {
        Command::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line_is_nothing()
    {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("   \t ").unwrap(), None);
    }

    #[test]
    fn test_aliases()
    {
        assert_eq!(parse("h"), Command::Help);
        assert_eq!(parse("c"), Command::Continue);
        assert_eq!(parse("s"), Command::Step);
        assert_eq!(parse("regs"), Command::Registers);
        assert_eq!(parse("r"), Command::Registers);
        assert_eq!(parse("bt"), Command::Stack);
        assert_eq!(parse("info"), Command::Breakpoints);
        assert_eq!(parse("q"), Command::Quit);
        assert_eq!(parse("exit"), Command::Quit);
    }

    #[test]
    fn test_command_names_are_case_sensitive()
    {
        assert!(matches!(
            Command::parse("Continue"),
            Err(ReplError::UnknownCommand(name)) if name == "Continue"
        ));
    }

    #[test]
    fn test_launch_keeps_arguments()
    {
        assert_eq!(
            parse("launch ./target/debug/demo --count  3"),
            Command::Launch {
                program: PathBuf::from("./target/debug/demo"),
                args: vec!["--count".to_string(), "3".to_string()],
            }
        );
    }

    #[test]
    fn test_missing_arguments_report_usage()
    {
        let cases = [
            ("launch", "usage: launch <program> [args...]"),
            ("b", "usage: break <address|function>"),
            ("delete", "usage: delete <address>"),
            ("mem", "usage: memory <address> [size]"),
            ("print", "usage: print <varname> [size]"),
            ("set counter", "usage: set <varname> <value>"),
        ];
        for (line, message) in cases {
            let err = Command::parse(line).unwrap_err();
            assert_eq!(err.to_string(), message, "line {line:?}");
        }
    }

    #[test]
    fn test_break_target()
    {
        assert_eq!(parse("break 0x401000"), Command::Break(BreakTarget::Address(Address::new(0x401000))));
        assert_eq!(parse("b main"), Command::Break(BreakTarget::Function("main".to_string())));
        // only a lowercase 0x prefix selects an address
        assert_eq!(parse("b 401000"), Command::Break(BreakTarget::Function("401000".to_string())));

        let err = Command::parse("break 0xzz").unwrap_err();
        assert_eq!(err.to_string(), "invalid address: 0xzz");
    }

    #[test]
    fn test_memory_size_defaults()
    {
        assert_eq!(
            parse("x 0x1000"),
            Command::Memory {
                address: Address::new(0x1000),
                size: DEFAULT_DUMP_SIZE
            }
        );
        assert_eq!(
            parse("memory 4096 bogus"),
            Command::Memory {
                address: Address::new(4096),
                size: DEFAULT_DUMP_SIZE
            }
        );
        assert_eq!(
            parse("print counter 4"),
            Command::Print {
                name: "counter".to_string(),
                size: 4
            }
        );
        assert_eq!(
            parse("printvar counter"),
            Command::Print {
                name: "counter".to_string(),
                size: DEFAULT_PRINT_SIZE
            }
        );
    }

    #[test]
    fn test_set_value()
    {
        assert_eq!(
            parse("setvar counter 0x2a"),
            Command::Set {
                name: "counter".to_string(),
                value: 42
            }
        );
        let err = Command::parse("set counter forty").unwrap_err();
        assert_eq!(err.to_string(), "invalid value: forty");
    }

    #[test]
    fn test_parse_u64_auto()
    {
        assert_eq!(parse_u64_auto("42"), Some(42));
        assert_eq!(parse_u64_auto("0"), Some(0));
        assert_eq!(parse_u64_auto("0x2A"), Some(42));
        assert_eq!(parse_u64_auto("0X2a"), Some(42));
        assert_eq!(parse_u64_auto("052"), Some(42));
        assert_eq!(parse_u64_auto("0o52"), Some(42));
        assert_eq!(parse_u64_auto("0b101010"), Some(42));
        assert_eq!(parse_u64_auto("0xffffffffffffffff"), Some(u64::MAX));

        assert_eq!(parse_u64_auto(""), None);
        assert_eq!(parse_u64_auto("0x"), None);
        assert_eq!(parse_u64_auto("+5"), None);
        assert_eq!(parse_u64_auto("-5"), None);
        assert_eq!(parse_u64_auto("09"), None);
        assert_eq!(parse_u64_auto("0x1_0000_0000_0000_0000"), None);
    }
}
