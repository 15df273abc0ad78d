use serde::Serialize;

use crate::{cpu::Flags, machine::Machine};

/// Snapshot of the observable machine state, for debugger front ends
/// and trace comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalState {
    pub regs: [u16; 16],
    pub pc: u16,
    pub flags: Flags,
    pub opcode: u8,
    pub halted: bool,
    pub awaiting_vblank: bool,
    pub boot_mode: bool,
    pub selected_bank: Option<usize>,
    pub oam_cursor: usize,
}

pub trait ReportState {
    fn report_state(&mut self) -> anyhow::Result<InternalState>;
}

impl ReportState for Machine {
    fn report_state(&mut self) -> anyhow::Result<InternalState> {
        let bus = self.bus.borrow();
        Ok(InternalState {
            regs: self.cpu.regs,
            pc: self.cpu.pc,
            flags: self.cpu.flags,
            opcode: bus.read_byte(self.cpu.pc),
            halted: self.cpu.halted,
            awaiting_vblank: self.cpu.awaiting_vblank,
            boot_mode: bus.memory.boot_mode,
            selected_bank: bus.memory.banks.as_ref().map(|b| b.selected()),
            oam_cursor: bus.oam.cursor(),
        })
    }
}
