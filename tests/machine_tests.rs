use shrp_core::{
    cartridge,
    input::{StaticInput, BUTTON_A, BUTTON_START},
    machine_with_cartridge,
    memory::{CART_NOT_A_ROM, SYS_CART_LOADED, SYS_ERROR_CODE},
    oam::{NO_COLLISION, OAM_ENTRIES},
    Machine, MachineBuilder,
};
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

fn run(code: &[u8]) -> Machine {
    let image = cartridge::build_image("MB TEST", "tests", 0, &[0xFF; 16], code);
    let mut machine = machine_with_cartridge(&image);
    machine.step();
    machine
}

#[test]
fn test_reserved_write_resets_to_boot_mode() {
    // STMB (0xF800),R0 hits the reserved region
    let machine = run(&[0xFE, 0x20, 0x00, 0xF8, 0xFF]);
    assert!(machine.boot_mode());
    assert!(machine.halted());
    assert_eq!(machine.bus.borrow().read_byte(SYS_ERROR_CODE), 0x01);
}

#[test]
fn test_oam_cursor_out_of_range_faults() {
    // LDI R0,600; SPRC R0
    let machine = run(&[0x10, 0x58, 0x02, 0xCD, 0x00, 0xFF]);
    assert!(machine.boot_mode());
    assert_eq!(machine.bus.borrow().read_byte(SYS_ERROR_CODE), 0x02);
}

#[test]
fn test_oam_auto_cursor_wraps_without_fault() {
    // park the cursor on the last slot, then draw twice
    let last = (OAM_ENTRIES - 1) as u16;
    let machine = run(&[
        0x10,
        (last & 0xFF) as u8,
        (last >> 8) as u8, // LDI R0,511
        0xCD,
        0x00, // SPRC R0
        0x12,
        0x0A,
        0x00, // LDI R2,10
        0x13,
        0x14,
        0x00, // LDI R3,20
        0x52,
        0x01,
        0x00,
        0x00, // DRAW R2 (slot 511)
        0x52,
        0x02,
        0x00,
        0x00, // DRAW R2 (slot 0, wrapped)
        0xFF,
    ]);
    assert!(!machine.boot_mode());
    let bus = machine.bus.borrow();
    assert_eq!(bus.oam.cursor(), 1);
    assert_eq!(bus.oam.entry(OAM_ENTRIES - 1).unwrap().tile, 1);
    assert_eq!(bus.oam.entry(0).unwrap().tile, 2);
}

#[test]
fn test_alt_cls_invalidates_oam_and_cursor() {
    let machine = run(&[
        0x12, 0x0A, 0x00, // LDI R2,10
        0x13, 0x14, 0x00, // LDI R3,20
        0x52, 0x01, 0x00, 0x00, // DRAW R2
        0x52, 0x01, 0x00, 0x00, // DRAW R2
        0xFE, 0x00, // CLSA
        0xFF,
    ]);
    let bus = machine.bus.borrow();
    assert_eq!(bus.oam.cursor(), 0);
    assert!((0..OAM_ENTRIES).all(|slot| bus.oam.entry(slot).is_none()));
}

#[test]
fn test_boot_verification_starts_cartridge() {
    // BIOS writes a nonzero byte to the verification address
    let bios = [
        0x10, 0x01, 0x00, // LDI R0,1
        0xFE, 0x20, 0x04, 0xFF, // STMB (0xFF04),R0
        0xFF, // HALT
    ];
    let cart_image = cartridge::build_image(
        "BOOTED",
        "tests",
        0,
        &[0xFF; 16],
        &[0x15, 0x07, 0x00, 0xFF], // LDI R5,7; HALT
    );
    let cartridge = cartridge::Cartridge::parse(&cart_image).unwrap();
    let mut machine = MachineBuilder::new()
        .bios(bios.to_vec())
        .cartridge(cartridge)
        .build();

    assert!(machine.boot_mode());
    machine.step();
    assert!(!machine.boot_mode());

    machine.step();
    assert_eq!(machine.cpu.regs[5], 7);
    assert!(machine.halted());
}

#[test]
fn test_not_a_rom_sentinel() {
    let mut machine = Machine::new();
    machine.insert_cartridge_image(&[0u8; 100]);
    assert_eq!(
        machine.bus.borrow().read_byte(SYS_CART_LOADED),
        CART_NOT_A_ROM
    );
}

#[test]
fn test_collision_opcode_finds_overlap() {
    let machine = run(&[
        0x12, 0x64, 0x00, // LDI R2,100
        0x13, 0x64, 0x00, // LDI R3,100
        0x52, 0x01, 0x00, 0x00, // DRAW R2 (slot 0)
        0x12, 0x68, 0x00, // LDI R2,104
        0x13, 0x67, 0x00, // LDI R3,103
        0x52, 0x01, 0x00, 0x00, // DRAW R2 (slot 1)
        0x11, 0x00, 0x00, // LDI R1,0
        0xC7, 0x01, // COL R0,R1
        0xFF,
    ]);
    assert_eq!(machine.cpu.regs[0], 1);
    // and the far slot reports none
    assert_eq!(machine.bus.borrow().collision(1), 0);
    assert_eq!(machine.bus.borrow().collision(2), NO_COLLISION);
}

#[test]
fn test_draw_background_attr_is_excluded_from_collision() {
    // slot 0 is a game object, slot 1 overlaps it but carries the
    // background attr bit
    let machine = run(&[
        0x12, 0x64, 0x00, // LDI R2,100
        0x13, 0x64, 0x00, // LDI R3,100
        0x52, 0x01, 0x00, 0x00, // DRAW R2, tile 1
        0x12, 0x66, 0x00, // LDI R2,102
        0x13, 0x66, 0x00, // LDI R3,102
        0x52, 0x02, 0x10, 0x00, // DRAW R2, tile 2, background attr
        0x11, 0x00, 0x00, // LDI R1,0
        0xC7, 0x01, // COL R0,R1
        0xFF,
    ]);
    assert_eq!(machine.cpu.regs[0], NO_COLLISION);
    let bus = machine.bus.borrow();
    assert_eq!(bus.oam.entry(1).unwrap().kind, 0);
    assert!(bus.oam.entry(1).unwrap().background());
}

#[test]
fn test_input_latched_between_frames() {
    let image = cartridge::build_image(
        "INPUT",
        "tests",
        0,
        &[0xFF; 16],
        &[
            0x01, // VBLNK (frame 1 ends, input latched)
            0xC2, 0x00, // INPUT R0, pad 0
            0xC2, 0x11, // INPUT R1, pad 1
            0xFF,
        ],
    );
    let mut machine = machine_with_cartridge(&image);
    machine.set_input(Box::new(StaticInput {
        state: [BUTTON_A, BUTTON_START],
    }));

    machine.step();
    machine.step();
    assert_eq!(machine.cpu.regs[0], BUTTON_A as u16);
    assert_eq!(machine.cpu.regs[1], BUTTON_START as u16);
}

#[test]
fn test_save_ram_view_and_writeback() {
    // LDI R0,0xBEEF; STM (0xE000),R0; HALT
    let mut machine = run(&[0x10, 0xEF, 0xBE, 0x30, 0x00, 0xE0, 0xFF]);
    let saved = machine.save_ram();
    assert_eq!(&saved[..2], &[0xEF, 0xBE]);

    let mut restored = saved.clone();
    restored[0] = 0x11;
    restored[1] = 0x22;
    machine.load_save_ram(&restored);
    assert_eq!(machine.bus.borrow().read_word(0xE000), 0x2211);
}

#[test]
fn test_bank_switching_selects_rom_banks() {
    let mut body = vec![0u8; 0x4000 * 3];
    let code = [
        0xFE, 0x10, 0x00, 0x40, // LDMB R0,(0x4000)
        0xCA, 0x01, // BNK 1
        0xFE, 0x11, 0x00, 0x40, // LDMB R1,(0x4000)
        0xFF,
    ];
    body[..code.len()].copy_from_slice(&code);
    body[0x4000] = 0xAA;
    body[0x8000] = 0xBB;

    let machine = run(&body);
    assert_eq!(machine.cpu.regs[0], 0xAA);
    assert_eq!(machine.cpu.regs[1], 0xBB);
}

#[test]
fn test_frame_rgba_has_expected_size() {
    let machine = run(&[0xFF]);
    let frame = machine.frame_rgba();
    assert_eq!(frame.len(), 256 * 256 * 4);
}
