use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

pub const OAM_ENTRIES: usize = 512;
pub const ENTRY_SIZE: usize = 7;
pub const OAM_BYTES: usize = OAM_ENTRIES * ENTRY_SIZE;

/// Returned by collision checks when no sprite overlaps.
pub const NO_COLLISION: u16 = 0xFFFF;

pub const ATTR_HFLIP: u8 = 0x01;
pub const ATTR_VFLIP: u8 = 0x02;
pub const ATTR_ALT_PALETTE: u8 = 0x04;
pub const ATTR_HUD: u8 = 0x08;
/// DRAW maps this bit to type byte 0 (background decoration), since its
/// operands carry no separate type field.
pub const ATTR_BACKGROUND: u8 = 0x10;

/// Sprites are 8x8 atlas tiles; collision boxes use the same size.
pub const SPRITE_SIZE: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OamEntry {
    pub x: u16,
    pub y: u16,
    pub tile: u8,
    pub attr: u8,
    pub kind: u8,
}

impl OamEntry {
    pub fn hflip(&self) -> bool {
        self.attr & ATTR_HFLIP != 0
    }

    pub fn vflip(&self) -> bool {
        self.attr & ATTR_VFLIP != 0
    }

    pub fn alt_palette(&self) -> bool {
        self.attr & ATTR_ALT_PALETTE != 0
    }

    pub fn hud(&self) -> bool {
        self.attr & ATTR_HUD != 0
    }

    /// Kind 0 marks background decoration, excluded from collision.
    pub fn background(&self) -> bool {
        self.kind == 0
    }
}

/// Object Attribute Memory: a fixed table of sprite entries with an
/// auto-advancing write cursor and a parallel tag byte per slot.
///
/// Entries are 7 bytes: x:16, y:16, tile:8, attr:8, type:8 (LE words).
/// A slot whose bytes are all 0xFF is the "empty" sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oam {
    #[serde(with = "BigArray")]
    data: [u8; OAM_BYTES],
    #[serde(with = "BigArray")]
    tags: [u8; OAM_ENTRIES],
    cursor: usize,
}

impl Default for Oam {
    fn default() -> Self {
        Self::new()
    }
}

impl Oam {
    pub fn new() -> Self {
        Self {
            data: [0xFF; OAM_BYTES],
            tags: [0; OAM_ENTRIES],
            cursor: 0,
        }
    }

    /// Invalidates every entry and rewinds the cursor.
    pub fn reset(&mut self) {
        self.data.fill(0xFF);
        self.tags.fill(0);
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Explicit cursor assignment; out-of-range is a fault at the caller.
    pub fn set_cursor(&mut self, index: usize) -> Result<(), usize> {
        if index >= OAM_ENTRIES {
            return Err(index);
        }
        self.cursor = index;
        Ok(())
    }

    /// Writes an entry at the cursor slot and advances, wrapping past the
    /// last slot back to 0. Returns the slot written.
    pub fn push(&mut self, entry: OamEntry, tag: u8) -> usize {
        let slot = self.cursor;
        self.write_entry(slot, entry);
        self.tags[slot] = tag;
        self.cursor = (self.cursor + 1) % OAM_ENTRIES;
        slot
    }

    pub fn write_entry(&mut self, slot: usize, entry: OamEntry) {
        let base = slot * ENTRY_SIZE;
        self.data[base..base + 2].copy_from_slice(&entry.x.to_le_bytes());
        self.data[base + 2..base + 4].copy_from_slice(&entry.y.to_le_bytes());
        self.data[base + 4] = entry.tile;
        self.data[base + 5] = entry.attr;
        self.data[base + 6] = entry.kind;
    }

    /// Returns the entry at `slot`, or None for the 0xFF sentinel.
    pub fn entry(&self, slot: usize) -> Option<OamEntry> {
        let base = slot * ENTRY_SIZE;
        let bytes = &self.data[base..base + ENTRY_SIZE];
        if bytes.iter().all(|&b| b == 0xFF) {
            return None;
        }
        Some(OamEntry {
            x: u16::from_le_bytes([bytes[0], bytes[1]]),
            y: u16::from_le_bytes([bytes[2], bytes[3]]),
            tile: bytes[4],
            attr: bytes[5],
            kind: bytes[6],
        })
    }

    pub fn tag(&self, slot: usize) -> u8 {
        self.tags[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, OamEntry)> + '_ {
        (0..OAM_ENTRIES).filter_map(|slot| self.entry(slot).map(|e| (slot, e)))
    }

    /// AABB collision of `slot` against every other populated entry,
    /// skipping HUD and background entries on both sides. Returns the
    /// first colliding slot index or [`NO_COLLISION`].
    pub fn collide(&self, slot: usize) -> u16 {
        let Some(a) = self.entry(slot) else {
            return NO_COLLISION;
        };
        if a.hud() || a.background() {
            return NO_COLLISION;
        }

        for (other, b) in self.iter() {
            if other == slot || b.hud() || b.background() {
                continue;
            }
            if aabb_overlap(&a, &b) {
                return other as u16;
            }
        }
        NO_COLLISION
    }
}

fn aabb_overlap(a: &OamEntry, b: &OamEntry) -> bool {
    a.x < b.x.wrapping_add(SPRITE_SIZE)
        && b.x < a.x.wrapping_add(SPRITE_SIZE)
        && a.y < b.y.wrapping_add(SPRITE_SIZE)
        && b.y < a.y.wrapping_add(SPRITE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(x: u16, y: u16) -> OamEntry {
        OamEntry {
            x,
            y,
            tile: 1,
            attr: 0,
            kind: 1,
        }
    }

    #[test]
    fn test_cursor_wraps_past_last_slot() {
        let mut oam = Oam::new();
        oam.set_cursor(OAM_ENTRIES - 1).unwrap();
        let slot = oam.push(entry(1, 1), 0);
        assert_eq!(slot, OAM_ENTRIES - 1);
        assert_eq!(oam.cursor(), 0);
    }

    #[test]
    fn test_explicit_cursor_out_of_range() {
        let mut oam = Oam::new();
        assert!(oam.set_cursor(OAM_ENTRIES).is_err());
        assert!(oam.set_cursor(OAM_ENTRIES - 1).is_ok());
    }

    #[test]
    fn test_collision_is_symmetric() {
        let mut oam = Oam::new();
        oam.push(entry(100, 100), 0);
        oam.push(entry(104, 103), 0);
        oam.push(entry(300, 300), 0);

        assert_eq!(oam.collide(0), 1);
        assert_eq!(oam.collide(1), 0);
        assert_eq!(oam.collide(2), NO_COLLISION);
    }

    #[test]
    fn test_collision_skips_hud_and_background() {
        let mut oam = Oam::new();
        oam.push(entry(10, 10), 0);
        let mut hud = entry(12, 12);
        hud.attr = ATTR_HUD;
        oam.push(hud, 0);
        let mut bg = entry(11, 11);
        bg.kind = 0;
        oam.push(bg, 0);

        assert_eq!(oam.collide(0), NO_COLLISION);
    }
}
