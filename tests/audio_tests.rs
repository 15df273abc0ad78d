use shrp_core::{
    apu::{note_to_hz, AudioRam, CONTROL_GATE},
    cartridge, machine_with_cartridge,
    sequencer::Sequencer,
    sound::{AudioState, SAMPLES_PER_TICK},
    Machine,
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
    let image = cartridge::build_image("APU TEST", "tests", 0, &[0xFF; 16], code);
    let mut machine = machine_with_cartridge(&image);
    machine.step();
    machine
}

#[test]
fn test_play_a4_programs_440_hz_and_gate() {
    // LDI R0,69; LDI R1,2; PLAY note=R0 channel=R1 instrument 0; HALT
    let machine = run(&[0x10, 0x45, 0x00, 0x11, 0x02, 0x00, 0xC0, 0x01, 0x00, 0xFF]);

    // channel 2 record starts at 0xF008
    let bus = machine.bus.borrow();
    let freq = bus.read_word(0xF008);
    assert!((freq as f32 - 440.0).abs() < 0.5);
    assert_ne!(bus.read_byte(0xF00A) & CONTROL_GATE, 0);
}

#[test]
fn test_stop_opcode_drops_gate() {
    // play on channel 3, then STOP R1
    let machine = run(&[
        0x10, 0x45, 0x00, // LDI R0,69
        0x11, 0x03, 0x00, // LDI R1,3
        0xC0, 0x01, 0x00, // PLAY
        0xC1, 0x10, // STOP R1
        0xFF,
    ]);
    let bus = machine.bus.borrow();
    assert_eq!(bus.read_byte(0xF00E) & CONTROL_GATE, 0);
}

#[test]
fn test_mutea_hard_stops_all_channels() {
    let machine = run(&[
        0x10, 0x45, 0x00, // LDI R0,69
        0x11, 0x00, 0x00, // LDI R1,0
        0xC0, 0x01, 0x00, // PLAY
        0xFE, 0x01, // MUTEA
        0xFF,
    ]);
    let bus = machine.bus.borrow();
    assert_eq!(bus.read_byte(0xF002), 0);
}

#[test]
fn test_instr_opcode_loads_instrument_table() {
    // ADSR bytes live at 0xA000; INSTR 9 copies them
    let machine = run(&[
        0x10, 0x00, 0xA0, // LDI R0,0xA000
        0x11, 0x34, 0x12, // LDI R1,0x1234
        0x31, 0x00, 0xA0, // STM (0xA000),R1
        0x11, 0x78, 0x56, // LDI R1,0x5678
        0x31, 0x02, 0xA0, // STM (0xA002),R1
        0x70, 0x09, // INSTR R0, 9
        0xFF,
    ]);
    let bus = machine.bus.borrow();
    // instrument table starts 32 bytes into audio RAM
    let base = 0xF000 + 32 + 9 * 4;
    assert_eq!(bus.read_byte(base), 0x34);
    assert_eq!(bus.read_byte(base + 1), 0x12);
    assert_eq!(bus.read_byte(base + 2), 0x78);
    assert_eq!(bus.read_byte(base + 3), 0x56);
}

#[test]
fn test_song_opcode_drives_channel_through_audio_pull() {
    // song data in work RAM: channel 1, note 69, duration 1, then END
    let machine = run(&[
        0x10, 0x00, 0xB0, // LDI R0,0xB000
        0x11, 0x01, 0x00, // LDI R1,1 (channel)
        0xFE, 0x21, 0x00, 0xB0, // STMB (0xB000),R1
        0x11, 0x45, 0x00, // LDI R1,69 (note)
        0xFE, 0x21, 0x01, 0xB0, // STMB (0xB001),R1
        0x11, 0x01, 0x00, // LDI R1,1 (duration)
        0xFE, 0x21, 0x02, 0xB0, // STMB (0xB002),R1
        0x11, 0xFF, 0x00, // LDI R1,0xFF (END)
        0xFE, 0x21, 0x04, 0xB0, // STMB (0xB004),R1
        0x60, // SONG R0
        0xFF,
    ]);

    let handle = machine.audio_handle();
    let mut out = vec![0.0f32; SAMPLES_PER_TICK as usize + 8];
    handle.fill(&mut out);

    let bus = machine.bus.borrow();
    let freq = bus.read_word(0xF004);
    assert!((freq as f32 - note_to_hz(69)).abs() < 0.5);
}

#[test]
fn test_sequencer_single_record_then_end() {
    // one zero-duration record chains straight into END
    let mut seq = Sequencer::new();
    let mut ram = vec![0u8; 0x10000];
    ram[0x9000..0x9008].copy_from_slice(&[2, 1, 0, 0, 0xFF, 0, 0, 0]);
    seq.start(0x9000, ram);

    let events = seq.tick();
    assert_eq!(events.len(), 2);
    assert!(!seq.enabled());
}

#[test]
fn test_audio_pull_produces_finite_bounded_samples() {
    let mut state = AudioState::new();
    state.play_note(0, 60, 0, false);
    state.play_note(6, 40, 0, false);

    let shared = std::sync::Arc::new(parking_lot::Mutex::new(state));
    let handle = shrp_core::AudioHandle::new(shared);
    let mut out = vec![0.0f32; 4096];
    handle.fill(&mut out);
    assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    assert!(out.iter().any(|&s| s != 0.0));
}

#[test]
fn test_audio_ram_default_presets() {
    let ram = AudioRam::default();
    let adsr = ram.instrument(0);
    assert_eq!(adsr.sustain, 200);
    // untouched slots stay zeroed
    let blank = ram.instrument(20);
    assert_eq!((blank.attack, blank.release), (0, 0));
}
