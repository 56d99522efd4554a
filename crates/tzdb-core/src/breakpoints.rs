//! # Software Breakpoints
//!
//! Bookkeeping and installation of `int3` breakpoints.
//!
//! A breakpoint replaces the first byte of an instruction with the one-byte
//! trap opcode. When the target executes it, the OS reports a trap with the
//! instruction pointer one byte past the breakpoint address; the session uses
//! [`BreakpointManager::disarm`] to put the original byte back before the
//! instruction is re-executed.
//!
//! ## Invariants
//!
//! - At most one [`Breakpoint`] per address.
//! - While a breakpoint is enabled, the byte in the target at its address is
//!   [`TRAP_OPCODE`] and `original_byte` is what was there before.
//! - A removed breakpoint leaves no bookkeeping behind.
//!
//! Memory is reached through [`MemoryAccess`], so the manager works with any
//! backend (and with the scripted controller used in tests).

use std::collections::BTreeMap;

use crate::debugger::MemoryAccess;
use crate::error::{DebuggerError, Result};
use crate::types::Address;

/// The x86 `int3` instruction
pub const TRAP_OPCODE: u8 = 0xCC;

/// One installed software breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint
{
    address: Address,
    original_byte: u8,
    enabled: bool,
}

impl Breakpoint
{
    /// Address of the patched instruction
    #[must_use]
    pub const fn address(&self) -> Address
    {
        self.address
    }

    /// Instruction byte the trap opcode replaced
    #[must_use]
    pub const fn original_byte(&self) -> u8
    {
        self.original_byte
    }

    /// Whether the trap opcode is currently resident in the target
    ///
    /// A breakpoint is disabled between being hit and the next resume, while
    /// the original instruction is executed.
    #[must_use]
    pub const fn is_enabled(&self) -> bool
    {
        self.enabled
    }
}

/// Address-keyed table of the session's breakpoints
#[derive(Debug, Default)]
pub struct BreakpointManager
{
    breakpoints: BTreeMap<Address, Breakpoint>,
}

fn read_byte<M: MemoryAccess + ?Sized>(memory: &M, address: Address) -> Result<u8>
{
    memory
        .read_memory(address, 1)?
        .first()
        .copied()
        .ok_or_else(|| DebuggerError::memory(address.value(), "short read"))
}

impl BreakpointManager
{
    /// Create an empty table
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Install a breakpoint at `address`
    ///
    /// Saves the byte at `address`, writes [`TRAP_OPCODE`] over it and records
    /// the breakpoint as enabled.
    ///
    /// ## Errors
    ///
    /// - `BreakpointExists`: the address already carries a breakpoint
    /// - `NotRunning` / `MemoryAccessFailed`: from the memory accessor; the table
    ///   is left unchanged
    pub fn set<M: MemoryAccess + ?Sized>(&mut self, memory: &mut M, address: Address) -> Result<&Breakpoint>
    {
        if self.breakpoints.contains_key(&address) {
            return Err(DebuggerError::BreakpointExists(address.value()));
        }

        let original_byte = read_byte(memory, address)?;
        memory.write_memory(address, &[TRAP_OPCODE])?;
        tracing::debug!(address = %address, original_byte, "breakpoint installed");

        Ok(self.breakpoints.entry(address).or_insert(Breakpoint {
            address,
            original_byte,
            enabled: true,
        }))
    }

    /// Remove the breakpoint at `address`
    ///
    /// Writes the original byte back when the trap is resident, then deletes the
    /// entry.
    ///
    /// ## Errors
    ///
    /// - `BreakpointNotFound`: no breakpoint at `address`
    /// - `MemoryAccessFailed`: the original byte could not be restored; the entry
    ///   is kept
    pub fn remove<M: MemoryAccess + ?Sized>(&mut self, memory: &mut M, address: Address) -> Result<Breakpoint>
    {
        let breakpoint = *self
            .breakpoints
            .get(&address)
            .ok_or(DebuggerError::BreakpointNotFound(address.value()))?;

        if breakpoint.enabled {
            memory.write_memory(address, &[breakpoint.original_byte])?;
        }
        self.breakpoints.remove(&address);
        tracing::debug!(address = %address, "breakpoint removed");
        Ok(breakpoint)
    }

    /// Put the original byte back and mark the breakpoint disabled
    ///
    /// No-op for a breakpoint that is already disabled.
    pub fn disarm<M: MemoryAccess + ?Sized>(&mut self, memory: &mut M, address: Address) -> Result<()>
    {
        let breakpoint = self
            .breakpoints
            .get_mut(&address)
            .ok_or(DebuggerError::BreakpointNotFound(address.value()))?;

        if breakpoint.enabled {
            memory.write_memory(address, &[breakpoint.original_byte])?;
            breakpoint.enabled = false;
        }
        Ok(())
    }

    /// Write the trap opcode again and mark the breakpoint enabled
    ///
    /// No-op for a breakpoint that is already enabled.
    pub fn rearm<M: MemoryAccess + ?Sized>(&mut self, memory: &mut M, address: Address) -> Result<()>
    {
        let breakpoint = self
            .breakpoints
            .get_mut(&address)
            .ok_or(DebuggerError::BreakpointNotFound(address.value()))?;

        if !breakpoint.enabled {
            memory.write_memory(address, &[TRAP_OPCODE])?;
            breakpoint.enabled = true;
        }
        Ok(())
    }

    /// Look up the breakpoint at `address`
    pub fn get(&self, address: Address) -> Option<&Breakpoint>
    {
        self.breakpoints.get(&address)
    }

    /// Whether an enabled breakpoint sits at `address`
    pub fn is_enabled_at(&self, address: Address) -> bool
    {
        self.get(address).is_some_and(Breakpoint::is_enabled)
    }

    /// Iterate over the breakpoints in address order
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint>
    {
        self.breakpoints.values()
    }

    /// Forget every breakpoint without touching target memory
    ///
    /// Used once the target is gone and its address space no longer exists.
    pub fn clear(&mut self)
    {
        self.breakpoints.clear();
    }

    /// Remove every breakpoint from the target and empty the table
    ///
    /// Best effort: a byte that cannot be restored is logged and skipped so the
    /// remaining breakpoints are still removed.
    pub fn restore_all<M: MemoryAccess + ?Sized>(&mut self, memory: &mut M)
    {
        for (address, breakpoint) in std::mem::take(&mut self.breakpoints) {
            if !breakpoint.enabled {
                continue;
            }
            if let Err(e) = memory.write_memory(address, &[breakpoint.original_byte]) {
                tracing::warn!("Failed to restore original byte at {}: {}", address, e);
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::debugger::ProcessController;
    use crate::testing::FakeProcess;

    const TEXT: Address = Address::new(0x40_1000);

    fn running_fake() -> FakeProcess
    {
        let mut fake = FakeProcess::new().with_memory(TEXT, &[0x55, 0x48, 0x89, 0xE5]).with_entry(TEXT);
        fake.launch(std::path::Path::new("/bin/prog"), &[]).unwrap();
        fake
    }

    #[test]
    fn test_set_patches_trap_and_records_original()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();

        let bp = *manager.set(&mut fake, TEXT).unwrap();
        assert_eq!(bp.address(), TEXT);
        assert_eq!(bp.original_byte(), 0x55);
        assert!(bp.is_enabled());
        assert_eq!(fake.peek(TEXT), Some(TRAP_OPCODE));
    }

    #[test]
    fn test_set_twice_is_rejected()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();
        manager.set(&mut fake, TEXT).unwrap();

        let err = manager.set(&mut fake, TEXT).unwrap_err();
        assert!(matches!(err, DebuggerError::BreakpointExists(0x40_1000)));
        assert_eq!(manager.get(TEXT).map(Breakpoint::original_byte), Some(0x55));
    }

    #[test]
    fn test_set_on_unmapped_address_leaves_no_entry()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();

        let err = manager.set(&mut fake, Address::new(0xdead_0000)).unwrap_err();
        assert!(matches!(err, DebuggerError::MemoryAccessFailed { .. }));
        assert_eq!(manager.iter().count(), 0);
    }

    #[test]
    fn test_remove_restores_original_byte()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();
        manager.set(&mut fake, TEXT).unwrap();

        let removed = manager.remove(&mut fake, TEXT).unwrap();
        assert_eq!(removed.original_byte(), 0x55);
        assert_eq!(fake.peek(TEXT), Some(0x55));
        assert_eq!(manager.iter().count(), 0);

        let err = manager.remove(&mut fake, TEXT).unwrap_err();
        assert!(matches!(err, DebuggerError::BreakpointNotFound(0x40_1000)));
    }

    #[test]
    fn test_disarm_and_rearm()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();
        manager.set(&mut fake, TEXT).unwrap();

        manager.disarm(&mut fake, TEXT).unwrap();
        assert!(!manager.is_enabled_at(TEXT));
        assert_eq!(fake.peek(TEXT), Some(0x55));

        manager.rearm(&mut fake, TEXT).unwrap();
        assert!(manager.is_enabled_at(TEXT));
        assert_eq!(fake.peek(TEXT), Some(TRAP_OPCODE));
    }

    #[test]
    fn test_remove_disabled_breakpoint_does_not_write()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();
        manager.set(&mut fake, TEXT).unwrap();
        manager.disarm(&mut fake, TEXT).unwrap();
        // Simulate the instruction having been patched by the program itself.
        fake.write_memory(TEXT, &[0x90]).unwrap();

        manager.remove(&mut fake, TEXT).unwrap();
        assert_eq!(fake.peek(TEXT), Some(0x90));
    }

    #[test]
    fn test_restore_all_empties_table()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();
        manager.set(&mut fake, TEXT).unwrap();
        manager.set(&mut fake, TEXT + 2).unwrap();

        manager.restore_all(&mut fake);
        assert_eq!(manager.iter().count(), 0);
        assert_eq!(fake.peek(TEXT), Some(0x55));
        assert_eq!(fake.peek(TEXT + 2), Some(0x89));
    }

    #[test]
    fn test_iter_is_address_ordered()
    {
        let mut fake = running_fake();
        let mut manager = BreakpointManager::new();
        manager.set(&mut fake, TEXT + 3).unwrap();
        manager.set(&mut fake, TEXT).unwrap();

        let addresses: Vec<Address> = manager.iter().map(Breakpoint::address).collect();
        assert_eq!(addresses, vec![TEXT, TEXT + 3]);
        assert_eq!(manager.iter().count(), 2);
    }
}
