//! x86-64 general register file.
//!
//! Both backends target x86-64: Linux fills [`Registers`] from
//! `user_regs_struct`, Windows from the AMD64 `CONTEXT` record. Registers that
//! only one OS exposes (`orig_rax`, debug registers, ...) are not modelled and
//! are preserved by the backends when the file is written back.

use super::Address;

/// Architectural x86-64 register, in the order the `registers` command prints them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum X86_64Register
{
    /// RAX - Accumulator register (often used for return values)
    Rax,
    /// RBX - Base register
    Rbx,
    /// RCX - Counter register
    Rcx,
    /// RDX - Data register
    Rdx,
    /// RSI - Source index register (function arguments)
    Rsi,
    /// RDI - Destination index register (function arguments)
    Rdi,
    /// RBP - Frame pointer
    Rbp,
    /// RSP - Stack pointer
    Rsp,
    /// R8 - General-purpose register
    R8,
    /// R9 - General-purpose register
    R9,
    /// R10 - General-purpose register
    R10,
    /// R11 - General-purpose register
    R11,
    /// R12 - General-purpose register
    R12,
    /// R13 - General-purpose register
    R13,
    /// R14 - General-purpose register
    R14,
    /// R15 - General-purpose register
    R15,
    /// RIP - Instruction pointer
    Rip,
    /// RFLAGS - Status flags
    Eflags,
    /// Code segment selector
    Cs,
    /// Stack segment selector
    Ss,
    /// Data segment selector
    Ds,
    /// Extra segment selector
    Es,
    /// FS segment selector
    Fs,
    /// GS segment selector
    Gs,
    /// FS base address (thread-local storage on Linux)
    FsBase,
    /// GS base address
    GsBase,
}

impl X86_64Register
{
    /// Every register, in display order
    pub const ALL: [X86_64Register; 26] = [
        X86_64Register::Rax,
        X86_64Register::Rbx,
        X86_64Register::Rcx,
        X86_64Register::Rdx,
        X86_64Register::Rsi,
        X86_64Register::Rdi,
        X86_64Register::Rbp,
        X86_64Register::Rsp,
        X86_64Register::R8,
        X86_64Register::R9,
        X86_64Register::R10,
        X86_64Register::R11,
        X86_64Register::R12,
        X86_64Register::R13,
        X86_64Register::R14,
        X86_64Register::R15,
        X86_64Register::Rip,
        X86_64Register::Eflags,
        X86_64Register::Cs,
        X86_64Register::Ss,
        X86_64Register::Ds,
        X86_64Register::Es,
        X86_64Register::Fs,
        X86_64Register::Gs,
        X86_64Register::FsBase,
        X86_64Register::GsBase,
    ];

    /// Index of this register in [`Registers`]' backing array
    const fn index(self) -> usize
    {
        self as usize
    }

    /// Lower-case register name as printed by the front-end
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tzdb_core::types::X86_64Register;
    ///
    /// assert_eq!(X86_64Register::Rip.name(), "rip");
    /// assert_eq!(X86_64Register::FsBase.name(), "fs_base");
    /// ```
    pub const fn name(self) -> &'static str
    {
        match self {
            X86_64Register::Rax => "rax",
            X86_64Register::Rbx => "rbx",
            X86_64Register::Rcx => "rcx",
            X86_64Register::Rdx => "rdx",
            X86_64Register::Rsi => "rsi",
            X86_64Register::Rdi => "rdi",
            X86_64Register::Rbp => "rbp",
            X86_64Register::Rsp => "rsp",
            X86_64Register::R8 => "r8",
            X86_64Register::R9 => "r9",
            X86_64Register::R10 => "r10",
            X86_64Register::R11 => "r11",
            X86_64Register::R12 => "r12",
            X86_64Register::R13 => "r13",
            X86_64Register::R14 => "r14",
            X86_64Register::R15 => "r15",
            X86_64Register::Rip => "rip",
            X86_64Register::Eflags => "eflags",
            X86_64Register::Cs => "cs",
            X86_64Register::Ss => "ss",
            X86_64Register::Ds => "ds",
            X86_64Register::Es => "es",
            X86_64Register::Fs => "fs",
            X86_64Register::Gs => "gs",
            X86_64Register::FsBase => "fs_base",
            X86_64Register::GsBase => "gs_base",
        }
    }
}

/// Snapshot of the target's general register file
///
/// Values are copied out of the target when read; mutating a `Registers` has no
/// effect until it is handed back to
/// [`RegisterAccess::write_registers`](crate::debugger::RegisterAccess::write_registers).
///
/// ## Example
///
/// ```rust
/// use tzdb_core::types::{Address, Registers, X86_64Register};
///
/// let mut regs = Registers::new();
/// regs.set_pc(Address::new(0x401000));
/// regs.set(X86_64Register::Rax, 42);
///
/// assert_eq!(regs.get(X86_64Register::Rip), 0x401000);
/// assert_eq!(regs.pc(), Address::new(0x401000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registers
{
    values: [u64; X86_64Register::ALL.len()],
}

impl Registers
{
    /// Create a register file with every register zeroed
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Read a register
    pub const fn get(&self, register: X86_64Register) -> u64
    {
        self.values[register.index()]
    }

    /// Overwrite a register
    pub fn set(&mut self, register: X86_64Register, value: u64)
    {
        self.values[register.index()] = value;
    }

    /// Program counter (`rip`)
    pub const fn pc(&self) -> Address
    {
        Address::new(self.get(X86_64Register::Rip))
    }

    /// Move the program counter
    pub fn set_pc(&mut self, pc: Address)
    {
        self.set(X86_64Register::Rip, pc.value());
    }

    /// Stack pointer (`rsp`)
    pub const fn sp(&self) -> Address
    {
        Address::new(self.get(X86_64Register::Rsp))
    }

    /// Frame pointer (`rbp`)
    pub const fn fp(&self) -> Address
    {
        Address::new(self.get(X86_64Register::Rbp))
    }

    /// Iterate over `(register, value)` pairs in display order
    pub fn iter(&self) -> impl Iterator<Item = (X86_64Register, u64)> + '_
    {
        X86_64Register::ALL.iter().map(move |&reg| (reg, self.get(reg)))
    }
}
