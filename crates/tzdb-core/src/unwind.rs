//! # Stack Unwinding
//!
//! Frame-pointer backtraces for x86-64.
//!
//! Code compiled with frame pointers keeps a linked list on the stack: `rbp`
//! points at the caller's saved `rbp`, and the return address sits right above
//! it at `rbp + 8`. Walking that list gives one frame per call. At a
//! function's first instruction the prologue has not run yet, so the return
//! address is read from `[rsp]` instead.
//!
//! Frames are symbolised against the executable's file addresses, so the load
//! bias of the running image is subtracted before lookup.

use smallvec::SmallVec;

use crate::debugger::MemoryAccess;
use crate::error::{DebuggerError, Result};
use crate::symbols::{BinaryMetadata, Symbolization};
use crate::types::{Address, Registers};

/// Upper bound on the number of frames reported
pub const MAX_FRAMES: usize = 64;

/// Frames collected for one backtrace
pub type Backtrace = SmallVec<[StackFrame; 16]>;

/// One frame of a backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame
{
    /// Depth, 0 being the innermost frame
    pub index: usize,
    /// Runtime program counter (a return address for outer frames)
    pub pc: Address,
    /// Function and line the frame maps to, if known
    pub symbol: Option<Symbolization>,
}

/// Walks the `rbp` chain of a stopped thread
pub struct StackUnwinder<'a, M: ?Sized>
{
    memory: &'a M,
    metadata: Option<&'a BinaryMetadata>,
    load_bias: u64,
}

impl<'a, M: MemoryAccess + ?Sized> StackUnwinder<'a, M>
{
    /// Create an unwinder
    ///
    /// `load_bias` is the runtime address minus the file address of the main
    /// image (0 for non-relocated executables).
    pub fn new(memory: &'a M, metadata: Option<&'a BinaryMetadata>, load_bias: u64) -> Self
    {
        Self {
            memory,
            metadata,
            load_bias,
        }
    }

    /// Produce up to [`MAX_FRAMES`] frames starting at `regs`
    ///
    /// The walk stops at a null frame pointer, a null return address, an
    /// unreadable stack slot, or a frame pointer that does not move towards
    /// the stack base.
    pub fn unwind(&self, regs: &Registers) -> Backtrace
    {
        let mut frames = Backtrace::new();
        let first = self.frame(0, regs.pc(), false);
        let at_entry = first.symbol.as_ref().is_some_and(|symbol| symbol.offset == 0);
        frames.push(first);

        if at_entry {
            match self.read_u64(regs.sp()) {
                Ok(ret) if ret != 0 => frames.push(self.frame(1, Address::new(ret), true)),
                Ok(_) => return frames,
                Err(e) => {
                    tracing::debug!("stack walk stopped at {}: {}", regs.sp(), e);
                    return frames;
                }
            }
        }

        let mut fp = regs.fp();
        while frames.len() < MAX_FRAMES && fp != Address::ZERO && fp.value() % 8 == 0 {
            let (saved_fp, ret) = match self.read_u64(fp).and_then(|saved| Ok((saved, self.read_u64(fp + 8)?))) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!("stack walk stopped at {}: {}", fp, e);
                    break;
                }
            };
            if ret == 0 {
                break;
            }
            frames.push(self.frame(frames.len(), Address::new(ret), true));

            let saved_fp = Address::new(saved_fp);
            if saved_fp <= fp {
                break;
            }
            fp = saved_fp;
        }

        frames
    }

    fn frame(&self, index: usize, pc: Address, is_return_address: bool) -> StackFrame
    {
        // A return address points after the call; look up the call itself.
        let lookup = if is_return_address { pc - 1 } else { pc };
        let symbol = self
            .metadata
            .and_then(|metadata| metadata.symbolize(lookup - self.load_bias))
            .map(|mut symbol| {
                if is_return_address {
                    symbol.offset += 1;
                }
                symbol
            });
        StackFrame { index, pc, symbol }
    }

    fn read_u64(&self, address: Address) -> Result<u64>
    {
        let bytes = self.memory.read_memory(address, 8)?;
        let word: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DebuggerError::memory(address.value(), "short read"))?;
        Ok(u64::from_le_bytes(word))
    }
}
