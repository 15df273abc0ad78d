//! The motherboard: owns the bus and CPU, drives the per-frame step
//! loop, and arbitrates boot, cartridge hand-off and fault recovery
//! through a message queue.

use std::{cell::RefCell, collections::VecDeque, rc::Rc, sync::Arc};

use parking_lot::Mutex;

use crate::{
    bank::BankSet,
    bus::Bus,
    cartridge::Cartridge,
    cpu::Cpu,
    input::{InputSource, NullInput},
    memory::{
        ATLAS_TOP, BANK_SIZE, CART_LOADED, CART_NOT_A_ROM, MAGIC_BYTE, PALETTE_START,
        SAVE_RAM_SIZE, SAVE_RAM_START, SYS_BIOS_VERSION, SYS_CART_LOADED, SYS_ERROR_CODE,
        SYS_MAGIC,
    },
    partial_hexdump,
    sound::{AudioHandle, AudioState, SharedAudio},
};

/// Instructions executed per frame before the PPU pass runs anyway.
pub const STEP_BUDGET: usize = 16_000;

/// BIOS overlay bytes (addresses covered while boot mode is active).
const OVERLAY_SIZE: usize = ATLAS_TOP as usize + 1;
/// Tail bytes of a long BIOS image never copied into RAM; they would
/// land on the color palette.
const BIOS_TAIL_GUARD: usize = 32;

const DEFAULT_BIOS_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ReservedWrite(u16),
    OamCursor(u16),
    StackUnderflow,
}

impl Fault {
    /// Error code written to [`SYS_ERROR_CODE`] for cartridge code.
    pub fn code(&self) -> u8 {
        match self {
            Fault::ReservedWrite(_) => 0x01,
            Fault::OamCursor(_) => 0x02,
            Fault::StackUnderflow => 0x03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Fault(Fault),
    CartVerified(u8),
}

pub struct Machine {
    pub bus: Rc<RefCell<Bus>>,
    pub cpu: Cpu,
    pub queue: Rc<RefCell<VecDeque<Message>>>,
    audio: SharedAudio,
    input: Box<dyn InputSource>,
    cartridge: Option<Cartridge>,
    bios_version: u16,
    powering_on: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let audio: SharedAudio = Arc::new(Mutex::new(AudioState::new()));
        let bus = Rc::new(RefCell::new(Bus::new(audio.clone(), queue.clone())));
        let cpu = Cpu::new(bus.clone());

        let mut machine = Self {
            bus,
            cpu,
            queue,
            audio,
            input: Box::new(NullInput),
            cartridge: None,
            bios_version: DEFAULT_BIOS_VERSION,
            powering_on: true,
        };
        machine.power_on();
        machine
    }

    /// Bootstrap: boot mode, default palette, system bytes, CPU reset.
    /// Faults are suppressed while this flag window is open.
    fn power_on(&mut self) {
        self.powering_on = true;
        let mut bus = self.bus.borrow_mut();
        bus.memory.boot_mode = true;
        bus.reset_devices();
        for i in 0..16u16 {
            bus.poke(PALETTE_START + i, i as u8);
        }
        bus.poke(SYS_MAGIC, MAGIC_BYTE);
        let [lo, hi] = self.bios_version.to_le_bytes();
        bus.poke(SYS_BIOS_VERSION, lo);
        bus.poke(SYS_BIOS_VERSION + 1, hi);
        drop(bus);
        self.cpu.reset();
        self.queue.borrow_mut().retain(|m| !matches!(m, Message::Fault(_)));
        self.powering_on = false;
    }

    pub fn set_input(&mut self, input: Box<dyn InputSource>) {
        self.input = input;
    }

    /// Installs a BIOS image as the boot overlay. A tail past the
    /// overlay is copied into system RAM, minus its last 32 bytes.
    pub fn load_bios(&mut self, image: &[u8]) {
        tracing::info!("[MB] BIOS image, {} bytes", image.len());
        let mut bus = self.bus.borrow_mut();
        bus.memory.load_bios(image);
        if image.len() > OVERLAY_SIZE {
            let tail_end = image.len().saturating_sub(BIOS_TAIL_GUARD);
            if tail_end > OVERLAY_SIZE {
                bus.memory
                    .load(OVERLAY_SIZE as u16, &image[OVERLAY_SIZE..tail_end]);
            }
        }
        bus.poke(SYS_CART_LOADED, 0);
    }

    pub fn load_bios_file(&mut self, path: std::path::PathBuf) -> anyhow::Result<()> {
        let image = std::fs::read(path)?;
        self.load_bios(&image);
        Ok(())
    }

    /// Loads a parsed cartridge: body at address 0, the remainder past
    /// the fixed region split into switchable banks.
    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        tracing::info!(
            "[MB] Cartridge \"{}\" by {}, {} bytes",
            cartridge.title,
            cartridge.author,
            cartridge.body.len()
        );
        let mut bus = self.bus.borrow_mut();
        bus.memory.load(0, &cartridge.body);
        if cartridge.body.len() > BANK_SIZE {
            let chunks: Vec<&[u8]> = cartridge.body[BANK_SIZE..].chunks(BANK_SIZE).collect();
            tracing::debug!("[MB] {} ROM bank(s)", chunks.len());
            bus.memory.banks = Some(BankSet::new(&chunks));
        }
        bus.poke(SYS_CART_LOADED, CART_LOADED);
        drop(bus);
        self.cartridge = Some(cartridge);
    }

    /// Parses and loads a raw cartridge image. A malformed image is not
    /// an error to the caller; it leaves the "not a ROM" byte for the
    /// BIOS to display.
    pub fn insert_cartridge_image(&mut self, image: &[u8]) {
        match Cartridge::parse(image) {
            Ok(cartridge) => self.insert_cartridge(cartridge),
            Err(err) => {
                tracing::warn!("[MB] Cartridge rejected: {}", err);
                self.bus.borrow_mut().poke(SYS_CART_LOADED, CART_NOT_A_ROM);
            }
        }
    }

    /// Verification write seen in boot mode: reset the hardware, apply
    /// the cartridge palette, leave boot mode and run from address 0.
    /// Also callable directly to skip the BIOS entirely.
    pub fn start_cartridge(&mut self) {
        tracing::info!("[MB] Cartridge verified, leaving boot mode");
        let mut bus = self.bus.borrow_mut();
        bus.reset_devices();
        for i in 0..16usize {
            let entry = self
                .cartridge
                .as_ref()
                .map(|c| c.palette[i])
                .unwrap_or(0xFF);
            let value = if entry == 0xFF { i as u8 } else { entry & 0x1F };
            bus.poke(PALETTE_START + i as u16, value);
        }
        bus.memory.boot_mode = false;
        drop(bus);
        self.cpu.reset();
    }

    fn handle_fault(&mut self, fault: Fault) {
        if self.powering_on {
            tracing::debug!("[MB] Fault {:?} suppressed during power-on", fault);
            return;
        }
        tracing::error!("[MB] Fault {:?}, resetting to boot mode", fault);
        let mut bus = self.bus.borrow_mut();
        bus.memory.fill(0, BANK_SIZE as u16 - 1, 0);
        bus.reset_devices();
        bus.memory.boot_mode = true;
        bus.poke(SYS_ERROR_CODE, fault.code());
        drop(bus);
        self.cpu.reset();
        self.cpu.halted = true;
    }

    fn drain_queue(&mut self) {
        loop {
            let message = self.queue.borrow_mut().pop_front();
            match message {
                Some(Message::CartVerified(_)) => self.start_cartridge(),
                Some(Message::Fault(fault)) => self.handle_fault(fault),
                None => break,
            }
        }
    }

    /// One video frame: run the CPU up to the budget or until it halts
    /// or waits for VBlank, then poll input and composite the frame.
    pub fn step(&mut self) {
        for _ in 0..STEP_BUDGET {
            if self.cpu.halted || self.cpu.awaiting_vblank {
                break;
            }
            self.cpu.step();
            if !self.queue.borrow().is_empty() {
                self.drain_queue();
            }
        }
        self.drain_queue();

        let pads = self.input.poll();
        {
            let mut bus = self.bus.borrow_mut();
            bus.input_state = pads;
            bus.render_frame();
        }
        self.cpu.awaiting_vblank = false;
    }

    pub fn frame_rgba(&self) -> Vec<u8> {
        self.bus.borrow().frame_rgba()
    }

    /// Thread-safe handle for the platform audio callback.
    pub fn audio_handle(&self) -> AudioHandle {
        AudioHandle::new(self.audio.clone())
    }

    pub fn save_ram(&self) -> Vec<u8> {
        let bus = self.bus.borrow();
        let start = SAVE_RAM_START as usize;
        bus.memory.ram()[start..start + SAVE_RAM_SIZE].to_vec()
    }

    pub fn load_save_ram(&mut self, data: &[u8]) {
        let len = data.len().min(SAVE_RAM_SIZE);
        if data.len() != SAVE_RAM_SIZE {
            tracing::warn!("[MB] Save RAM size {} != {}", data.len(), SAVE_RAM_SIZE);
        }
        self.bus.borrow_mut().memory.load(SAVE_RAM_START, &data[..len]);
    }

    pub fn pc(&self) -> u16 {
        self.cpu.pc
    }

    pub fn halted(&self) -> bool {
        self.cpu.halted
    }

    pub fn boot_mode(&self) -> bool {
        self.bus.borrow().memory.boot_mode
    }

    pub fn memory_dump(&self, start: u16, end: u16) -> String {
        partial_hexdump(self.bus.borrow().memory.ram(), start, end)
    }
}

/// Fluent construction: BIOS, cartridge and input wired before the
/// first frame runs.
#[derive(Default)]
pub struct MachineBuilder {
    bios: Option<Vec<u8>>,
    cartridge: Option<Cartridge>,
    input: Option<Box<dyn InputSource>>,
    bios_version: Option<u16>,
}

impl MachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bios(mut self, image: Vec<u8>) -> Self {
        self.bios = Some(image);
        self
    }

    pub fn bios_version(mut self, version: u16) -> Self {
        self.bios_version = Some(version);
        self
    }

    pub fn cartridge(mut self, cartridge: Cartridge) -> Self {
        self.cartridge = Some(cartridge);
        self
    }

    pub fn input(mut self, input: Box<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn build(self) -> Machine {
        let mut machine = Machine::new();
        if let Some(version) = self.bios_version {
            machine.bios_version = version;
            machine.power_on();
        }
        if let Some(input) = self.input {
            machine.set_input(input);
        }
        if let Some(bios) = self.bios {
            machine.load_bios(&bios);
        }
        if let Some(cartridge) = self.cartridge {
            machine.insert_cartridge(cartridge);
        }
        machine
    }
}
