//! Controller input seam. The core polls an [`InputSource`] once per frame
//! and latches one byte per controller on the bus.

pub const BUTTON_UP: u8 = 0x01;
pub const BUTTON_DOWN: u8 = 0x02;
pub const BUTTON_LEFT: u8 = 0x04;
pub const BUTTON_RIGHT: u8 = 0x08;
pub const BUTTON_A: u8 = 0x10;
pub const BUTTON_B: u8 = 0x20;
pub const BUTTON_START: u8 = 0x40;
pub const BUTTON_OPTION: u8 = 0x80;

pub const CONTROLLERS: usize = 2;

pub trait InputSource {
    /// Returns the current button state, one bit-flag byte per controller.
    fn poll(&mut self) -> [u8; CONTROLLERS];
}

/// Input source that never reports a pressed button.
#[derive(Debug, Default)]
pub struct NullInput;

impl InputSource for NullInput {
    fn poll(&mut self) -> [u8; CONTROLLERS] {
        [0; CONTROLLERS]
    }
}

/// Fixed-state input source, handy for tests and headless drivers.
#[derive(Debug, Default)]
pub struct StaticInput {
    pub state: [u8; CONTROLLERS],
}

impl InputSource for StaticInput {
    fn poll(&mut self) -> [u8; CONTROLLERS] {
        self.state
    }
}
