use crate::{
    font,
    oam::{Oam, OamEntry},
};

pub const VIEW_SIZE: usize = 256;
pub const FRAME_PIXELS: usize = VIEW_SIZE * VIEW_SIZE;
pub const GRID_SIZE: usize = 32;
pub const TILE_SIZE: usize = 8;
pub const TILE_BYTES: usize = TILE_SIZE * TILE_SIZE / 2;

/// Camera offsets are clamped so the viewport stays inside the
/// 65536x65536 logical world.
pub const CAMERA_MAX: u16 = (0x10000 - VIEW_SIZE as u32) as u16;

pub const NO_GLYPH: u8 = 0xFF;
pub const DEFAULT_FONT_COLOR: u8 = 15;

/// The fixed 32-entry master palette. Slots 0 and 16 are the transparent
/// pair; the upper half is a darker companion set for the +16 sprite
/// attribute offset.
#[rustfmt::skip]
pub const MASTER_PALETTE: [[u8; 3]; 32] = [
    [0x00, 0x00, 0x00], [0x1D, 0x2B, 0x53], [0x7E, 0x25, 0x53], [0x00, 0x87, 0x51],
    [0xAB, 0x52, 0x36], [0x5F, 0x57, 0x4F], [0xC2, 0xC3, 0xC7], [0xFF, 0xF1, 0xE8],
    [0xFF, 0x00, 0x4D], [0xFF, 0xA3, 0x00], [0xFF, 0xEC, 0x27], [0x00, 0xE4, 0x36],
    [0x29, 0xAD, 0xFF], [0x83, 0x76, 0x9C], [0xFF, 0x77, 0xA8], [0xFF, 0xCC, 0xAA],
    [0x00, 0x00, 0x00], [0x10, 0x18, 0x30], [0x42, 0x14, 0x2C], [0x00, 0x4C, 0x2E],
    [0x61, 0x2E, 0x1F], [0x35, 0x31, 0x2C], [0x6D, 0x6E, 0x71], [0x9A, 0x91, 0x8C],
    [0x92, 0x00, 0x2C], [0x93, 0x5E, 0x00], [0x96, 0x8B, 0x17], [0x00, 0x86, 0x20],
    [0x17, 0x65, 0x96], [0x4B, 0x44, 0x59], [0x96, 0x46, 0x63], [0x96, 0x78, 0x64],
];

/// Computes the text cursor after a signed move, with x overflow and
/// underflow borrowing into y and everything wrapping inside the grid.
pub fn wrap_cursor(x: u8, y: u8, dx: i16, dy: i16) -> (u8, u8) {
    let grid = GRID_SIZE as i32;
    let idx = (y as i32 * grid + x as i32 + dy as i32 * grid + dx as i32)
        .rem_euclid(grid * grid);
    ((idx % grid) as u8, (idx / grid) as u8)
}

/// Picture unit. Composites OAM sprites and the text grid into an
/// off-screen index buffer once per VBlank; exports RGBA on demand.
pub struct Ppu {
    /// One color index per pixel; bit 4 marks the alternate palette half.
    frame: Vec<u8>,
    text: [u8; GRID_SIZE * GRID_SIZE],
    pub cursor_x: u8,
    pub cursor_y: u8,
    pub font_color: u8,
    pub background: u8,
    pub camera_x: u16,
    pub camera_y: u16,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            frame: vec![0; FRAME_PIXELS],
            text: [NO_GLYPH; GRID_SIZE * GRID_SIZE],
            cursor_x: 0,
            cursor_y: 0,
            font_color: DEFAULT_FONT_COLOR,
            background: 0,
            camera_x: 0,
            camera_y: 0,
        }
    }

    /// Clears the text grid and resets the background color. The CLS
    /// opcode lands here; the ALT variant also wipes OAM at the bus.
    pub fn clear_screen(&mut self) {
        self.text.fill(NO_GLYPH);
        self.background = 0;
    }

    pub fn reset(&mut self) {
        self.clear_screen();
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.font_color = DEFAULT_FONT_COLOR;
        self.camera_x = 0;
        self.camera_y = 0;
    }

    pub fn set_cursor(&mut self, x: u8, y: u8) {
        self.cursor_x = x % GRID_SIZE as u8;
        self.cursor_y = y % GRID_SIZE as u8;
    }

    pub fn move_cursor(&mut self, dx: i16, dy: i16) {
        let (x, y) = wrap_cursor(self.cursor_x, self.cursor_y, dx, dy);
        self.cursor_x = x;
        self.cursor_y = y;
    }

    /// Places a character at the cursor and advances one cell.
    pub fn put_char(&mut self, code: u8) {
        let idx = self.cursor_y as usize * GRID_SIZE + self.cursor_x as usize;
        self.text[idx] = code;
        self.move_cursor(1, 0);
    }

    pub fn char_at(&self, x: u8, y: u8) -> u8 {
        self.text[y as usize * GRID_SIZE + x as usize]
    }

    pub fn set_font_color(&mut self, color: u8) {
        self.font_color = color & 0x0F;
    }

    pub fn set_camera(&mut self, x: u16, y: u16) {
        self.camera_x = x.min(CAMERA_MAX);
        self.camera_y = y.min(CAMERA_MAX);
    }

    pub fn move_camera(&mut self, dx: i16, dy: i16) {
        let x = (self.camera_x as i32 + dx as i32).clamp(0, CAMERA_MAX as i32);
        let y = (self.camera_y as i32 + dy as i32).clamp(0, CAMERA_MAX as i32);
        self.camera_x = x as u16;
        self.camera_y = y as u16;
    }

    /// The VBlank pass: background fill, camera-relative sprites, HUD
    /// sprites in raw screen space, then the text layer on top.
    pub fn render(&mut self, oam: &Oam, atlas: &[u8]) {
        self.frame.fill(self.background & 0x0F);

        let mut hud = Vec::new();
        for (_, entry) in oam.iter() {
            if entry.hud() {
                // HUD coordinates are byte screen coordinates; anything
                // outside that range is dropped rather than clipped.
                if entry.x < VIEW_SIZE as u16 && entry.y < VIEW_SIZE as u16 {
                    hud.push(entry);
                }
                continue;
            }
            let sx = entry.x as i32 - self.camera_x as i32;
            let sy = entry.y as i32 - self.camera_y as i32;
            self.blit_tile(atlas, &entry, sx, sy);
        }

        for entry in &hud {
            self.blit_tile(atlas, entry, entry.x as i32, entry.y as i32);
        }

        self.render_text();
    }

    fn blit_tile(&mut self, atlas: &[u8], entry: &OamEntry, sx: i32, sy: i32) {
        if sx <= -(TILE_SIZE as i32)
            || sy <= -(TILE_SIZE as i32)
            || sx >= VIEW_SIZE as i32
            || sy >= VIEW_SIZE as i32
        {
            return;
        }

        let base = entry.tile as usize * TILE_BYTES;
        if base + TILE_BYTES > atlas.len() {
            return;
        }
        let offset = if entry.alt_palette() { 0x10 } else { 0 };

        for row in 0..TILE_SIZE {
            let py = sy + row as i32;
            if !(0..VIEW_SIZE as i32).contains(&py) {
                continue;
            }
            let src_row = if entry.vflip() { 7 - row } else { row };
            for col in 0..TILE_SIZE {
                let px = sx + col as i32;
                if !(0..VIEW_SIZE as i32).contains(&px) {
                    continue;
                }
                let src_col = if entry.hflip() { 7 - col } else { col };
                let byte = atlas[base + src_row * 4 + src_col / 2];
                let nibble = if src_col % 2 == 0 {
                    byte >> 4
                } else {
                    byte & 0x0F
                };
                // color 0 is transparent, never written
                if nibble == 0 {
                    continue;
                }
                self.frame[py as usize * VIEW_SIZE + px as usize] = nibble | offset;
            }
        }
    }

    fn render_text(&mut self) {
        for cell_y in 0..GRID_SIZE {
            for cell_x in 0..GRID_SIZE {
                let code = self.text[cell_y * GRID_SIZE + cell_x];
                if code == NO_GLYPH {
                    continue;
                }
                let Some(rows) = font::glyph(code) else {
                    continue;
                };
                for (row, bits) in rows.iter().enumerate() {
                    let py = cell_y * TILE_SIZE + row;
                    for col in 0..8 {
                        if bits & (0x80 >> col) != 0 {
                            let px = cell_x * TILE_SIZE + col;
                            self.frame[py * VIEW_SIZE + px] = self.font_color;
                        }
                    }
                }
            }
        }
    }

    pub fn frame_indices(&self) -> &[u8] {
        &self.frame
    }

    /// Maps the index buffer through the 16-entry palette into the master
    /// palette, producing RGBA8888. Master slots 0 and 16 export alpha 0.
    pub fn to_rgba(&self, palette: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_PIXELS * 4);
        for &stored in &self.frame {
            let pal = palette[(stored & 0x0F) as usize] as usize & 0x1F;
            let master = (pal + if stored & 0x10 != 0 { 16 } else { 0 }) & 0x1F;
            let [r, g, b] = MASTER_PALETTE[master];
            let a = if master == 0 || master == 16 { 0 } else { 0xFF };
            out.extend_from_slice(&[r, g, b, a]);
        }
        out
    }
}
