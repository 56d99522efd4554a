//! Tests for platform-agnostic types

use tzdb_core::types::{Address, ProcessId, Registers, StopReason, X86_64Register};

#[test]
fn test_process_id_from_u32()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
}

#[test]
fn test_process_id_to_u32()
{
    let pid = ProcessId::from(54321);
    let value: u32 = pid.into();
    assert_eq!(value, 54321);
}

#[test]
fn test_process_id_equality()
{
    let pid1 = ProcessId::from(12345);
    let pid2 = ProcessId::from(12345);
    let pid3 = ProcessId::from(54321);

    assert_eq!(pid1, pid2);
    assert_ne!(pid1, pid3);
}

#[test]
fn test_address_display_is_lowercase_hex()
{
    assert_eq!(Address::new(0x7FFD_AB00).to_string(), "0x7ffdab00");
    assert_eq!(Address::ZERO.to_string(), "0x0");
    assert_eq!(format!("{:x}", Address::new(255)), "ff");
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::new(0x40_1000);
    assert_eq!(addr + 1, Address::new(0x40_1001));
    assert_eq!(addr - 0x1000, Address::new(0x40_0000));
    assert_eq!(Address::ZERO.checked_sub(1), None);
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert_eq!(Address::new(0x40_1234).align_down(0x1000), Address::new(0x40_1000));
}

#[test]
fn test_registers_new()
{
    let regs = Registers::new();
    assert_eq!(regs.pc(), Address::ZERO);
    assert_eq!(regs.sp(), Address::ZERO);
    assert_eq!(regs.fp(), Address::ZERO);
    assert!(regs.iter().all(|(_, value)| value == 0));
}

#[test]
fn test_registers_default()
{
    let regs = Registers::default();
    assert_eq!(regs, Registers::new());
}

#[test]
fn test_registers_named_accessors()
{
    let mut regs = Registers::new();
    regs.set(X86_64Register::Rip, 0x40_1000);
    regs.set(X86_64Register::Rsp, 0x7ffd_0000);
    regs.set(X86_64Register::Rbp, 0x7ffd_0040);

    assert_eq!(regs.pc(), Address::new(0x40_1000));
    assert_eq!(regs.sp(), Address::new(0x7ffd_0000));
    assert_eq!(regs.fp(), Address::new(0x7ffd_0040));

    regs.set_pc(Address::new(0x40_2000));
    assert_eq!(regs.get(X86_64Register::Rip), 0x40_2000);
}

#[test]
fn test_registers_iterate_in_display_order()
{
    let names: Vec<&str> = Registers::new().iter().map(|(reg, _)| reg.name()).collect();
    assert_eq!(names.len(), 26);
    assert_eq!(&names[..4], &["rax", "rbx", "rcx", "rdx"]);
    assert!(names.contains(&"rip"));
    assert!(names.contains(&"eflags"));
    assert_eq!(names.last(), Some(&"gs_base"));
}

#[test]
fn test_stop_reason_is_terminal()
{
    assert!(StopReason::Exited(0).is_terminal());
    assert!(StopReason::Terminated(9).is_terminal());
    assert!(!StopReason::Breakpoint(Address::new(0x1000)).is_terminal());
    assert!(!StopReason::Signal(11).is_terminal());
    assert!(!StopReason::Exception(0xC000_0005).is_terminal());
}
