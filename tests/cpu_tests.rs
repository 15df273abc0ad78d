use shrp_core::{cartridge, machine_with_cartridge, memory::SYS_ERROR_CODE, Machine};
use tracing_subscriber::fmt;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

/// Boots a machine with `code` as the cartridge body and runs one frame.
fn run(code: &[u8]) -> Machine {
    let image = cartridge::build_image("CPU TEST", "tests", 0, &[0xFF; 16], code);
    let mut machine = machine_with_cartridge(&image);
    machine.step();
    machine
}

#[test]
fn test_add_sets_no_flags_on_small_sum() {
    // LDI R0,5; LDI R1,3; ADD R0,R1; HALT
    let machine = run(&[0x10, 0x05, 0x00, 0x11, 0x03, 0x00, 0x81, 0x01, 0xFF]);
    assert_eq!(machine.cpu.regs[0], 8);
    assert_eq!(machine.cpu.flags.0, 0);
    assert!(machine.halted());
}

#[test]
fn test_sub_borrow_flags() {
    // LDI R0,3; LDI R1,5; SUB R0,R1; HALT
    let machine = run(&[0x10, 0x03, 0x00, 0x11, 0x05, 0x00, 0x82, 0x01, 0xFF]);
    assert_eq!(machine.cpu.regs[0], 0xFFFE);
    assert!(machine.cpu.flags.carry());
    assert!(machine.cpu.flags.negative());
    assert!(!machine.cpu.flags.zero());
    assert!(!machine.cpu.flags.overflow());
}

#[test]
fn test_div_and_mod_by_zero() {
    // LDI R0,9; LDI R1,0; DIV R0,R1; HALT
    let machine = run(&[0x10, 0x09, 0x00, 0x11, 0x00, 0x00, 0x84, 0x01, 0xFF]);
    assert_eq!(machine.cpu.regs[0], 0);
    assert!(machine.cpu.flags.zero());
    assert!(machine.cpu.flags.overflow());
    assert!(!machine.cpu.flags.carry());
    assert!(!machine.cpu.flags.negative());

    // MODI R0, 0 with a nonzero dividend behaves the same
    let machine = run(&[0x10, 0x09, 0x00, 0xA4, 0x00, 0x00, 0x00, 0xFF]);
    assert_eq!(machine.cpu.regs[0], 0);
    assert!(machine.cpu.flags.zero());
    assert!(machine.cpu.flags.overflow());
}

#[test]
fn test_adc_adds_carry_in() {
    // LDI R0,0xFFFF; LDI R1,1; ADD R0,R1 (carry out)
    // LDI R2,5; LDI R3,6; ADC R2,R3; HALT
    let machine = run(&[
        0x10, 0xFF, 0xFF, 0x11, 0x01, 0x00, 0x81, 0x01, 0x12, 0x05, 0x00, 0x13, 0x06, 0x00, 0x8A,
        0x23, 0xFF,
    ]);
    assert_eq!(machine.cpu.regs[0], 0);
    assert_eq!(machine.cpu.regs[2], 12);
}

#[test]
fn test_shl_carries_out_bit_15() {
    // LDI R0,0x8001; SHL R0; HALT
    let machine = run(&[0x10, 0x01, 0x80, 0x94, 0x00, 0xFF]);
    assert_eq!(machine.cpu.regs[0], 0x0002);
    assert!(machine.cpu.flags.carry());
    assert!(!machine.cpu.flags.overflow());
}

#[test]
fn test_conditional_jump_taken_on_zero() {
    // LDI R0,1; CMPI R0,1; JEQ 0x000C; HALT; pad; LDI R2,0x1234; HALT
    let machine = run(&[
        0x10, 0x01, 0x00, // 0x0000 LDI R0,1
        0xA8, 0x00, 0x01, 0x00, // 0x0003 CMPI R0,1
        0xB1, 0x0C, 0x00, // 0x0007 JEQ 0x000C
        0xFF, 0x00, // 0x000A HALT (skipped)
        0x12, 0x34, 0x12, // 0x000C LDI R2,0x1234
        0xFF, // 0x000F HALT
    ]);
    assert_eq!(machine.cpu.regs[2], 0x1234);
}

#[test]
fn test_call_and_ret() {
    let machine = run(&[
        0xB7, 0x08, 0x00, // 0x0000 CALL 0x0008
        0x11, 0x01, 0x00, // 0x0003 LDI R1,1
        0xFF, 0x00, // 0x0006 HALT
        0x10, 0x07, 0x00, // 0x0008 LDI R0,7
        0x03, // 0x000B RET
    ]);
    assert_eq!(machine.cpu.regs[0], 7);
    assert_eq!(machine.cpu.regs[1], 1);
    assert!(machine.cpu.call_stack.is_empty());
}

#[test]
fn test_ret_underflow_faults_to_boot_mode() {
    let machine = run(&[0x03]);
    assert!(machine.halted());
    assert!(machine.boot_mode());
    assert_eq!(machine.bus.borrow().read_byte(SYS_ERROR_CODE), 0x03);
}

#[test]
fn test_unknown_opcode_halts() {
    let machine = run(&[0x05]);
    assert!(machine.halted());
    assert_eq!(machine.pc(), 1);
    // a stray unknown opcode is a halt, not a fault
    assert!(!machine.boot_mode());
}

#[test]
fn test_ldm_stm_word_round_trip() {
    // LDI R0,0xABCD; STM (0xA100),R0; LDM R5,(0xA100); HALT
    let machine = run(&[
        0x10, 0xCD, 0xAB, 0x30, 0x00, 0xA1, 0x25, 0x00, 0xA1, 0xFF,
    ]);
    assert_eq!(machine.cpu.regs[5], 0xABCD);
    assert_eq!(machine.bus.borrow().read_word(0xA100), 0xABCD);
}

#[test]
fn test_alt_byte_load_store() {
    // LDI R0,0x1234; STMB (0xA200),R0; LDMB R1,(0xA200); HALT
    let machine = run(&[
        0x10, 0x34, 0x12, 0xFE, 0x20, 0x00, 0xA2, 0xFE, 0x11, 0x00, 0xA2, 0xFF,
    ]);
    assert_eq!(machine.cpu.regs[1], 0x0034);
    assert_eq!(machine.bus.borrow().read_byte(0xA200), 0x34);
}

#[test]
fn test_alt_pointer_arithmetic() {
    // R0 points at 0xA300 holding 10; ADDP [R0],5; CMPP [R0],15; HALT
    let machine = run(&[
        0x10, 0x00, 0xA3, // LDI R0,0xA300
        0x11, 0x0A, 0x00, // LDI R1,10
        0x31, 0x00, 0xA3, // STM (0xA300),R1
        0xFE, 0x60, 0x00, 0x05, 0x00, // ADDP [R0],5
        0xFE, 0x62, 0x00, 0x0F, 0x00, // CMPP [R0],15
        0xFF,
    ]);
    assert_eq!(machine.bus.borrow().read_word(0xA300), 15);
    assert!(machine.cpu.flags.zero());
}

#[test]
fn test_rnd_stays_within_bound() {
    // RND R0,10 then HALT; bound is inclusive
    for _ in 0..16 {
        let machine = run(&[0x40, 0x0A, 0xFF]);
        assert!(machine.cpu.regs[0] <= 10);
    }
}
