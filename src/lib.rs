pub mod apu;
pub mod bank;
pub mod bus;
pub mod cartridge;
pub mod cpu;
pub mod font;
pub mod input;
pub mod instruction;
pub mod internal_state;
pub mod machine;
pub mod memory;
pub mod oam;
pub mod ppu;
pub mod sequencer;
pub mod sound;
pub mod utils;

pub use cartridge::Cartridge;
pub use input::InputSource;
pub use internal_state::{InternalState, ReportState};
pub use machine::{Fault, Machine, MachineBuilder, Message};
pub use sound::AudioHandle;
pub use utils::{hexdump, partial_hexdump};

/// Boots a machine straight into a cartridge image, skipping the BIOS.
/// A front end with a real BIOS should use [`MachineBuilder`] instead.
pub fn machine_with_cartridge(image: &[u8]) -> Machine {
    let mut machine = Machine::new();
    machine.insert_cartridge_image(image);
    machine.start_cartridge();
    machine
}
