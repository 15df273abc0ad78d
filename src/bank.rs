use serde::{Deserialize, Serialize};

use crate::memory::BANK_SIZE;

/// One 16 KiB ROM image for the switchable window at 0x4000-0x7FFF.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct RomBank {
    pub data: Vec<u8>,
}

impl RomBank {
    pub fn new(rom: &[u8]) -> Self {
        let mut data = vec![0xFF; BANK_SIZE];
        let len = rom.len().min(BANK_SIZE);
        data[..len].copy_from_slice(&rom[..len]);
        RomBank { data }
    }

    pub fn read(&self, offset: u16) -> u8 {
        if (offset as usize) >= self.data.len() {
            return 0xFF;
        }
        self.data[offset as usize]
    }

    pub fn write(&mut self, offset: u16, value: u8) {
        if (offset as usize) >= self.data.len() {
            return;
        }
        self.data[offset as usize] = value;
    }
}

/// Set of banks substituting for the switchable-ROM region. Exactly one
/// bank is selected at a time; selecting an out-of-range index is ignored.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct BankSet {
    banks: Vec<RomBank>,
    selected: usize,
}

impl BankSet {
    pub fn new(images: &[&[u8]]) -> Self {
        BankSet {
            banks: images.iter().map(|rom| RomBank::new(rom)).collect(),
            selected: 0,
        }
    }

    pub fn select(&mut self, index: usize) {
        if index >= self.banks.len() {
            tracing::warn!("[BANK] Ignoring out-of-range bank select {}", index);
            return;
        }
        self.selected = index;
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    pub fn read(&self, offset: u16) -> u8 {
        self.banks[self.selected].read(offset)
    }

    pub fn write(&mut self, offset: u16, value: u8) {
        self.banks[self.selected].write(offset, value);
    }
}
