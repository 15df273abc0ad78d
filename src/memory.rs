use serde::{Deserialize, Serialize};

use crate::bank::BankSet;

pub const MEM_SIZE: usize = 0x10000;

/// Fixed ROM region, cartridge body origin and CPU reset vector.
pub const ROM_ORIGIN: u16 = 0x0000;
/// Switchable ROM window served by the selected bank when banks exist.
pub const BANK_START: u16 = 0x4000;
pub const BANK_END: u16 = 0x7FFF;
pub const BANK_SIZE: usize = 0x4000;
/// Sprite atlas, 256 tiles of 8x8 pixels at 4bpp. Always mapped.
pub const ATLAS_START: u16 = 0x8000;
pub const ATLAS_TOP: u16 = 0x9FFF;
/// Work RAM for cartridge use.
pub const WORK_RAM_START: u16 = 0xA000;
pub const WORK_RAM_END: u16 = 0xEFFF;
/// Everything above work RAM is system-reserved: audio RAM, instrument
/// table, system bytes and the color palette. Writes outside boot mode
/// fault.
pub const PROTECTED_START: u16 = 0xF000;
pub const AUDIO_RAM_START: u16 = 0xF000;
pub const AUDIO_RAM_END: u16 = 0xF11F;
pub const PALETTE_START: u16 = 0xFFF0;

/// Persistence window inside work RAM, exposed to the save-file
/// collaborator as a plain byte view.
pub const SAVE_RAM_START: u16 = 0xE000;
pub const SAVE_RAM_SIZE: usize = 0x1000;

pub const SYS_MAGIC: u16 = 0xFF00;
pub const SYS_BIOS_VERSION: u16 = 0xFF02;
pub const SYS_CART_VERIFY: u16 = 0xFF04;
pub const SYS_CART_LOADED: u16 = 0xFF05;
pub const SYS_ERROR_CODE: u16 = 0xFF06;

pub const MAGIC_BYTE: u8 = 0x5C;
pub const CART_LOADED: u8 = 0x01;
/// Sentinel recorded when a cartridge image fails to parse.
pub const CART_NOT_A_ROM: u8 = 0xFE;

/// System RAM plus the BIOS overlay and the optional bank set.
///
/// While `boot_mode` is true, reads at or below [`ATLAS_TOP`] are served
/// from the BIOS image; writes always land in system RAM.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Memory {
    ram: Vec<u8>,
    bios: Vec<u8>,
    pub boot_mode: bool,
    pub banks: Option<BankSet>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            ram: vec![0; MEM_SIZE],
            bios: vec![0; MEM_SIZE],
            boot_mode: true,
            banks: None,
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        if self.boot_mode && addr <= ATLAS_TOP {
            return self.bios[addr as usize];
        }
        if !self.boot_mode && (BANK_START..=BANK_END).contains(&addr) {
            if let Some(banks) = &self.banks {
                if !banks.is_empty() {
                    return banks.read(addr - BANK_START);
                }
            }
        }
        self.ram[addr as usize]
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        if !self.boot_mode && (BANK_START..=BANK_END).contains(&addr) {
            if let Some(banks) = &mut self.banks {
                if !banks.is_empty() {
                    banks.write(addr - BANK_START, value);
                    return;
                }
            }
        }
        self.ram[addr as usize] = value;
    }

    pub fn select_bank(&mut self, index: usize) {
        match &mut self.banks {
            Some(banks) => banks.select(index),
            None => tracing::warn!("[MEM] Bank select {} with no banks configured", index),
        }
    }

    /// Bulk load into system RAM, bypassing overlay and bank routing.
    /// Used only during boot/reset transitions.
    pub fn load(&mut self, start: u16, data: &[u8]) {
        let start = start as usize;
        let end = (start + data.len()).min(MEM_SIZE);
        self.ram[start..end].copy_from_slice(&data[..end - start]);
    }

    pub fn load_bios(&mut self, image: &[u8]) {
        let len = image.len().min(MEM_SIZE);
        self.bios.fill(0);
        self.bios[..len].copy_from_slice(&image[..len]);
    }

    pub fn fill(&mut self, start: u16, end: u16, value: u8) {
        self.ram[start as usize..=end as usize].fill(value);
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn atlas(&self) -> &[u8] {
        &self.ram[ATLAS_START as usize..=ATLAS_TOP as usize]
    }

    pub fn palette(&self) -> &[u8] {
        &self.ram[PALETTE_START as usize..]
    }
}
