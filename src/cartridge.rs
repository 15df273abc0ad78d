//! Cartridge and BIOS binary formats.
//!
//! A cartridge is a 64-byte header followed by the ROM body, which loads
//! at address 0. The header carries the `SHRP` magic, title/author
//! strings, the minimum BIOS version the cartridge needs, and an initial
//! 16-entry color palette (0xFF = keep the default index).

use std::{fs::File, io::Read, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HEADER_SIZE: usize = 64;
pub const MAGIC: &[u8; 4] = b"SHRP";

const TITLE_RANGE: std::ops::Range<usize> = 4..26;
const AUTHOR_RANGE: std::ops::Range<usize> = 26..46;
const VERSION_OFFSET: usize = 46;
const PALETTE_RANGE: std::ops::Range<usize> = 48..64;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("image too short: {0} bytes, need at least {HEADER_SIZE}")]
    TooShort(usize),
    #[error("bad magic {0:02X?}, expected \"SHRP\"")]
    BadMagic([u8; 4]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cartridge {
    pub title: String,
    pub author: String,
    pub min_bios_version: u16,
    /// Palette overrides; 0xFF entries keep the default index.
    pub palette: [u8; 16],
    pub body: Vec<u8>,
    pub path: Option<PathBuf>,
}

impl Cartridge {
    pub fn parse(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() < HEADER_SIZE {
            return Err(CartridgeError::TooShort(image.len()));
        }
        if &image[..4] != MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&image[..4]);
            return Err(CartridgeError::BadMagic(magic));
        }

        let mut palette = [0u8; 16];
        palette.copy_from_slice(&image[PALETTE_RANGE]);

        Ok(Cartridge {
            title: header_string(&image[TITLE_RANGE]),
            author: header_string(&image[AUTHOR_RANGE]),
            min_bios_version: u16::from_le_bytes([
                image[VERSION_OFFSET],
                image[VERSION_OFFSET + 1],
            ]),
            palette,
            body: image[HEADER_SIZE..].to_vec(),
            path: None,
        })
    }

    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let mut file = File::open(&path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let mut cart = Self::parse(&buffer)?;
        cart.path = Some(path);
        Ok(cart)
    }
}

fn header_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

/// Builds a header + body image, used by tests and tooling.
pub fn build_image(title: &str, author: &str, version: u16, palette: &[u8; 16], body: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; HEADER_SIZE];
    image[..4].copy_from_slice(MAGIC);
    for (dst, src) in image[TITLE_RANGE].iter_mut().zip(title.bytes()) {
        *dst = src;
    }
    for (dst, src) in image[AUTHOR_RANGE].iter_mut().zip(author.bytes()) {
        *dst = src;
    }
    image[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&version.to_le_bytes());
    image[PALETTE_RANGE].copy_from_slice(palette);
    image.extend_from_slice(body);
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let image = build_image("PIXEL QUEST", "someone", 3, &[0xFF; 16], &[0x10, 0x00, 0x05]);
        let cart = Cartridge::parse(&image).unwrap();
        assert_eq!(cart.title, "PIXEL QUEST");
        assert_eq!(cart.author, "someone");
        assert_eq!(cart.min_bios_version, 3);
        assert_eq!(cart.body, vec![0x10, 0x00, 0x05]);
    }

    #[test]
    fn test_too_short_and_bad_magic() {
        assert!(matches!(
            Cartridge::parse(&[0; 10]),
            Err(CartridgeError::TooShort(10))
        ));

        let mut image = build_image("X", "Y", 0, &[0xFF; 16], &[]);
        image[0] = b'Z';
        assert!(matches!(
            Cartridge::parse(&image),
            Err(CartridgeError::BadMagic(_))
        ));
    }
}
