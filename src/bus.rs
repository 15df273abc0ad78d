//! Address decoding and device arbitration.
//!
//! The bus owns memory, OAM and the PPU, holds the shared audio state,
//! and raises faults through the machine's message queue. CPU opcodes
//! reach every device side effect through methods here; the CPU itself
//! never touches a device directly.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::{
    apu::{Adsr, CHANNELS},
    input::CONTROLLERS,
    machine::{Fault, Message},
    memory::{
        Memory, AUDIO_RAM_END, AUDIO_RAM_START, PALETTE_START, PROTECTED_START, SYS_CART_VERIFY,
    },
    oam::{Oam, OamEntry, ATTR_BACKGROUND, NO_COLLISION},
    ppu::Ppu,
    sound::SharedAudio,
};

pub struct Bus {
    pub memory: Memory,
    pub oam: Oam,
    pub ppu: Ppu,
    pub audio: SharedAudio,
    pub input_state: [u8; CONTROLLERS],
    queue: Rc<RefCell<VecDeque<Message>>>,
}

impl Bus {
    pub fn new(audio: SharedAudio, queue: Rc<RefCell<VecDeque<Message>>>) -> Self {
        Self {
            memory: Memory::new(),
            oam: Oam::new(),
            ppu: Ppu::new(),
            audio,
            input_state: [0; CONTROLLERS],
            queue,
        }
    }

    pub fn fault(&self, fault: Fault) {
        self.queue.borrow_mut().push_back(Message::Fault(fault));
    }

    fn audio_offset(addr: u16) -> Option<usize> {
        (AUDIO_RAM_START..=AUDIO_RAM_END)
            .contains(&addr)
            .then(|| (addr - AUDIO_RAM_START) as usize)
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        if let Some(offset) = Self::audio_offset(addr) {
            return self.audio.lock().ram.read(offset);
        }
        self.memory.read_byte(addr)
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    /// CPU-visible write: protected-region policy applies. In boot mode
    /// everything is writable and a nonzero store to the verification
    /// byte hands control to the cartridge.
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        if self.memory.boot_mode {
            if addr == SYS_CART_VERIFY && value != 0 {
                self.queue.borrow_mut().push_back(Message::CartVerified(value));
            }
            self.poke(addr, value);
            return;
        }
        if addr >= PROTECTED_START {
            tracing::warn!("[BUS] Write {:02X} to reserved {:#06X}", value, addr);
            self.fault(Fault::ReservedWrite(addr));
            return;
        }
        self.memory.write_byte(addr, value);
    }

    pub fn write_word(&mut self, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// Internal write, exempt from the fault policy. Boot code, device
    /// triggers and bulk loads come through here.
    pub fn poke(&mut self, addr: u16, value: u8) {
        if let Some(offset) = Self::audio_offset(addr) {
            self.audio.lock().ram.write(offset, value);
            return;
        }
        self.memory.write_byte(addr, value);
    }

    pub fn select_bank(&mut self, index: usize) {
        self.memory.select_bank(index);
    }

    // --- device triggers ---

    pub fn clear_screen(&mut self) {
        self.ppu.clear_screen();
    }

    /// ALT clear: text grid, background, every OAM slot and the cursor.
    pub fn clear_all(&mut self) {
        self.ppu.clear_screen();
        self.oam.reset();
    }

    /// OAM push with the auto-advancing cursor; returns the slot used.
    /// The background attr bit selects type 0, everything else is a
    /// game object.
    pub fn draw_sprite(&mut self, x: u16, y: u16, tile: u8, attr: u8, tag: u8) -> usize {
        let kind = if attr & ATTR_BACKGROUND != 0 { 0 } else { 1 };
        let entry = OamEntry {
            x,
            y,
            tile,
            attr,
            kind,
        };
        self.oam.push(entry, tag)
    }

    pub fn set_oam_cursor(&mut self, index: u16) {
        if self.oam.set_cursor(index as usize).is_err() {
            tracing::warn!("[BUS] OAM cursor {} out of range", index);
            self.fault(Fault::OamCursor(index));
        }
    }

    pub fn collision(&self, slot: u16) -> u16 {
        if slot as usize >= crate::oam::OAM_ENTRIES {
            return NO_COLLISION;
        }
        self.oam.collide(slot as usize)
    }

    pub fn play_note(&mut self, channel: u8, note: u8, instrument: u8) {
        self.audio
            .lock()
            .play_note(channel as usize % CHANNELS, note, instrument, false);
    }

    pub fn stop_note(&mut self, channel: u8) {
        self.audio.lock().stop_note(channel as usize % CHANNELS);
    }

    /// MUTE: the song stops, sounding notes release on their own.
    pub fn stop_song(&mut self) {
        self.audio.lock().sequencer.disable();
    }

    /// ALT MUTE: immediate silence on all channels.
    pub fn mute_all(&mut self) {
        self.audio.lock().mute();
    }

    /// Snapshots system RAM and starts the sequencer there.
    pub fn start_song(&mut self, addr: u16) {
        tracing::debug!("[BUS] SONG at {:#06X}", addr);
        let snapshot = self.memory.ram().to_vec();
        self.audio.lock().start_song(addr, snapshot);
    }

    /// INSTR: copies 4 ADSR bytes at `addr` into the instrument table.
    pub fn set_instrument(&mut self, index: u8, addr: u16) {
        let adsr = Adsr {
            attack: self.read_byte(addr),
            decay: self.read_byte(addr.wrapping_add(1)),
            sustain: self.read_byte(addr.wrapping_add(2)),
            release: self.read_byte(addr.wrapping_add(3)),
        };
        self.audio.lock().ram.set_instrument(index, adsr);
    }

    pub fn set_palette_entry(&mut self, index: u8, master: u8) {
        let addr = PALETTE_START + (index & 0x0F) as u16;
        self.poke(addr, master & 0x1F);
    }

    pub fn controller(&self, pad: usize) -> u8 {
        self.input_state.get(pad).copied().unwrap_or(0)
    }

    /// Reads a NUL-terminated string for the OUTS debug opcode, bounded
    /// so a missing terminator cannot walk the whole address space.
    pub fn read_string(&self, addr: u16, max: usize) -> String {
        let mut bytes = Vec::new();
        for i in 0..max {
            let b = self.read_byte(addr.wrapping_add(i as u16));
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// The VBlank compositing pass.
    pub fn render_frame(&mut self) {
        let Bus {
            ppu, oam, memory, ..
        } = self;
        ppu.render(oam, memory.atlas());
    }

    pub fn frame_rgba(&self) -> Vec<u8> {
        self.ppu.to_rgba(self.memory.palette())
    }

    pub fn reset_devices(&mut self) {
        self.oam.reset();
        self.ppu.reset();
        self.audio.lock().reset();
        self.input_state = [0; CONTROLLERS];
    }
}
