//! Fetch/decode/execute engine. All memory traffic and device side
//! effects go through the shared [`Bus`]; the CPU owns only its
//! register file, flags, call stack and run state.

use std::{cell::RefCell, rc::Rc};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    bus::Bus,
    instruction::{self, Decoded, Op, PREFIX},
    machine::Fault,
    memory::ROM_ORIGIN,
};

pub const REGISTERS: usize = 16;

/// Flags bitfield: Carry=bit0, Zero=bit1, Overflow=bit2, Negative=bit3.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags(pub u8);

impl Flags {
    pub const CARRY: u8 = 0x01;
    pub const ZERO: u8 = 0x02;
    pub const OVERFLOW: u8 = 0x04;
    pub const NEGATIVE: u8 = 0x08;

    pub fn carry(&self) -> bool {
        self.0 & Self::CARRY != 0
    }

    pub fn zero(&self) -> bool {
        self.0 & Self::ZERO != 0
    }

    pub fn overflow(&self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    pub fn negative(&self) -> bool {
        self.0 & Self::NEGATIVE != 0
    }

    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn set_carry(&mut self, on: bool) {
        self.set(Self::CARRY, on);
    }

    pub fn set_zero(&mut self, on: bool) {
        self.set(Self::ZERO, on);
    }

    pub fn set_overflow(&mut self, on: bool) {
        self.set(Self::OVERFLOW, on);
    }

    pub fn set_negative(&mut self, on: bool) {
        self.set(Self::NEGATIVE, on);
    }
}

pub struct Cpu {
    pub regs: [u16; REGISTERS],
    pub pc: u16,
    pub flags: Flags,
    pub call_stack: Vec<u16>,
    pub halted: bool,
    pub awaiting_vblank: bool,
    pub bus: Rc<RefCell<Bus>>,
    rng: SmallRng,
}

impl Cpu {
    pub fn new(bus: Rc<RefCell<Bus>>) -> Self {
        Self {
            regs: [0; REGISTERS],
            pc: ROM_ORIGIN,
            flags: Flags::default(),
            call_stack: Vec::new(),
            halted: false,
            awaiting_vblank: false,
            bus,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn reset(&mut self) {
        self.regs = [0; REGISTERS];
        self.pc = ROM_ORIGIN;
        self.flags = Flags::default();
        self.call_stack.clear();
        self.halted = false;
        self.awaiting_vblank = false;
    }

    fn read_byte(&self, addr: u16) -> u8 {
        self.bus.borrow().read_byte(addr)
    }

    fn read_word(&self, addr: u16) -> u16 {
        self.bus.borrow().read_word(addr)
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        self.bus.borrow_mut().write_byte(addr, value);
    }

    fn write_word(&mut self, addr: u16, value: u16) {
        self.bus.borrow_mut().write_word(addr, value);
    }

    /// Executes one instruction. Control transfers set PC themselves;
    /// everything else advances by the decoded length.
    pub fn step(&mut self) {
        if self.halted {
            return;
        }
        let pc = self.pc;
        let first = self.read_byte(pc);

        let decoded = if first == PREFIX {
            let second = self.read_byte(pc.wrapping_add(1));
            match instruction::decode_alt(second) {
                Some(decoded) => decoded,
                None => {
                    tracing::error!("[CPU] Unknown ALT opcode {:02X} at {:#06X}", second, pc);
                    self.halted = true;
                    self.pc = pc.wrapping_add(2);
                    return;
                }
            }
        } else {
            match instruction::decode(first) {
                Some(decoded) => decoded,
                None => {
                    tracing::error!("[CPU] Unknown opcode {:02X} at {:#06X}", first, pc);
                    self.halted = true;
                    self.pc = pc.wrapping_add(1);
                    return;
                }
            }
        };

        if tracing::enabled!(tracing::Level::TRACE) {
            let mut bytes = [0u8; 5];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = self.read_byte(pc.wrapping_add(i as u16));
            }
            let (text, _) = instruction::disassemble(&bytes[..decoded.len as usize]);
            tracing::trace!("[CPU] {:#06X}  {}", pc, text);
        }

        // first operand byte, past the opcode (and prefix for ALT)
        let operands = pc.wrapping_add(decoded.len - decoded.operand_len());
        let mut next = pc.wrapping_add(decoded.len);
        self.execute(decoded, operands, &mut next);
        self.pc = next;
    }

    fn imm8(&self, operands: u16, index: u16) -> u8 {
        self.read_byte(operands.wrapping_add(index))
    }

    fn imm16(&self, operands: u16, index: u16) -> u16 {
        self.read_word(operands.wrapping_add(index))
    }

    /// Splits an RR operand byte into (high, low) register indices.
    fn reg_pair(&self, operands: u16) -> (usize, usize) {
        let byte = self.imm8(operands, 0);
        ((byte >> 4) as usize, (byte & 0x0F) as usize)
    }

    /// Single-register forms carry the register in the high nibble.
    fn reg_high(&self, operands: u16) -> usize {
        (self.imm8(operands, 0) >> 4) as usize
    }

    fn execute(&mut self, decoded: Decoded, operands: u16, next: &mut u16) {
        let r = decoded.reg as usize;
        match decoded.op {
            Op::Nop => {}
            Op::Vblank => self.awaiting_vblank = true,
            Op::Cls => self.bus.borrow_mut().clear_screen(),
            Op::Mute => self.bus.borrow_mut().stop_song(),
            Op::Halt => {
                tracing::debug!("[CPU] HALT at {:#06X}", self.pc);
                self.halted = true;
            }
            Op::Ret => match self.call_stack.pop() {
                Some(addr) => *next = addr,
                None => {
                    tracing::error!("[CPU] RET with empty call stack at {:#06X}", self.pc);
                    self.bus.borrow().fault(Fault::StackUnderflow);
                    self.halted = true;
                }
            },

            Op::Ldi => self.regs[r] = self.imm16(operands, 0),
            Op::Ldm => {
                let addr = self.imm16(operands, 0);
                self.regs[r] = self.read_word(addr);
            }
            Op::Stm => {
                let addr = self.imm16(operands, 0);
                self.write_word(addr, self.regs[r]);
            }
            Op::Rnd => {
                let max = self.imm8(operands, 0) as u16;
                self.regs[r] = self.rng.gen_range(0..=max);
            }
            Op::Draw => {
                let x = self.regs[r];
                let y = self.regs[(r + 1) & 0x0F];
                let tile = self.imm8(operands, 0);
                let attr = self.imm8(operands, 1);
                let tag = self.imm8(operands, 2);
                self.bus.borrow_mut().draw_sprite(x, y, tile, attr, tag);
            }
            Op::Song => {
                let addr = self.regs[r];
                self.bus.borrow_mut().start_song(addr);
            }
            Op::Instr => {
                let index = self.imm8(operands, 0);
                let addr = self.regs[r];
                self.bus.borrow_mut().set_instrument(index, addr);
            }

            Op::Mov => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.regs[b];
            }
            Op::Add => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_add(self.regs[a], self.regs[b], false);
            }
            Op::Sub => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_sub(self.regs[a], self.regs[b]);
            }
            Op::Mul => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_mul(self.regs[a], self.regs[b]);
            }
            Op::Div => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_div(self.regs[a], self.regs[b], false);
            }
            Op::Mod => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_div(self.regs[a], self.regs[b], true);
            }
            Op::And => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_logic(self.regs[a] & self.regs[b]);
            }
            Op::Or => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_logic(self.regs[a] | self.regs[b]);
            }
            Op::Xor => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.flags_logic(self.regs[a] ^ self.regs[b]);
            }
            Op::Cmp => {
                let (a, b) = self.reg_pair(operands);
                self.flags_sub(self.regs[a], self.regs[b]);
            }
            Op::Adc => {
                let (a, b) = self.reg_pair(operands);
                let carry = self.flags.carry();
                self.regs[a] = self.flags_add(self.regs[a], self.regs[b], carry);
            }
            Op::Ldp => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.read_word(self.regs[b]);
            }
            Op::Stp => {
                let (a, b) = self.reg_pair(operands);
                self.write_word(self.regs[b], self.regs[a]);
            }

            Op::Inc => {
                let a = self.reg_high(operands);
                self.regs[a] = self.flags_add(self.regs[a], 1, false);
            }
            Op::Dec => {
                let a = self.reg_high(operands);
                self.regs[a] = self.flags_sub(self.regs[a], 1);
            }
            Op::Neg => {
                let a = self.reg_high(operands);
                self.regs[a] = self.flags_sub(0, self.regs[a]);
            }
            Op::Not => {
                let a = self.reg_high(operands);
                self.regs[a] = self.flags_logic(!self.regs[a]);
            }
            Op::Shl => {
                let a = self.reg_high(operands);
                let value = self.regs[a];
                let result = self.flags_logic(value << 1);
                self.flags.set_carry(value & 0x8000 != 0);
                self.regs[a] = result;
            }
            Op::Shr => {
                let a = self.reg_high(operands);
                let value = self.regs[a];
                let result = self.flags_logic(value >> 1);
                self.flags.set_carry(value & 0x0001 != 0);
                self.regs[a] = result;
            }

            Op::AddI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_add(self.regs[a], imm, false);
            }
            Op::SubI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_sub(self.regs[a], imm);
            }
            Op::MulI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_mul(self.regs[a], imm);
            }
            Op::DivI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_div(self.regs[a], imm, false);
            }
            Op::ModI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_div(self.regs[a], imm, true);
            }
            Op::AndI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_logic(self.regs[a] & imm);
            }
            Op::OrI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_logic(self.regs[a] | imm);
            }
            Op::XorI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.regs[a] = self.flags_logic(self.regs[a] ^ imm);
            }
            Op::CmpI => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                self.flags_sub(self.regs[a], imm);
            }

            Op::Jmp => *next = self.imm16(operands, 0),
            Op::Jeq => self.branch(operands, next, self.flags.zero()),
            Op::Jne => self.branch(operands, next, !self.flags.zero()),
            Op::Jgt => self.branch(
                operands,
                next,
                !self.flags.zero() && self.flags.negative() == self.flags.overflow(),
            ),
            Op::Jlt => self.branch(
                operands,
                next,
                self.flags.negative() != self.flags.overflow(),
            ),
            Op::Jge => self.branch(
                operands,
                next,
                self.flags.negative() == self.flags.overflow(),
            ),
            Op::Jle => self.branch(
                operands,
                next,
                self.flags.zero() || self.flags.negative() != self.flags.overflow(),
            ),
            Op::Call => {
                let target = self.imm16(operands, 0);
                self.call_stack.push(self.pc.wrapping_add(decoded.len));
                *next = target;
            }

            Op::Play => {
                let (note_reg, channel_reg) = self.reg_pair(operands);
                let instrument = self.imm8(operands, 1);
                let note = self.regs[note_reg] as u8;
                let channel = self.regs[channel_reg] as u8;
                self.bus.borrow_mut().play_note(channel, note, instrument);
            }
            Op::Stop => {
                let a = self.reg_high(operands);
                let channel = self.regs[a] as u8;
                self.bus.borrow_mut().stop_note(channel);
            }
            Op::Input => {
                let byte = self.imm8(operands, 0);
                let a = (byte >> 4) as usize;
                let pad = (byte & 0x0F) as usize;
                self.regs[a] = self.bus.borrow().controller(pad) as u16;
            }
            Op::Text => {
                let a = self.reg_high(operands);
                let code = self.regs[a] as u8;
                self.bus.borrow_mut().ppu.put_char(code);
            }
            Op::Attr => {
                let color = self.imm8(operands, 0);
                self.bus.borrow_mut().ppu.set_font_color(color);
            }
            Op::SetCrs => {
                let x = self.imm8(operands, 0);
                let y = self.imm8(operands, 1);
                self.bus.borrow_mut().ppu.set_cursor(x, y);
            }
            Op::Swc => {
                let index = self.imm8(operands, 0);
                let master = self.imm8(operands, 1);
                self.bus.borrow_mut().set_palette_entry(index, master);
            }
            Op::Col => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.bus.borrow().collision(self.regs[b]);
            }
            Op::Cam => {
                let (a, b) = self.reg_pair(operands);
                let (x, y) = (self.regs[a], self.regs[b]);
                self.bus.borrow_mut().ppu.set_camera(x, y);
            }
            Op::Mcam => {
                let (a, b) = self.reg_pair(operands);
                let (dx, dy) = (self.regs[a] as i16, self.regs[b] as i16);
                self.bus.borrow_mut().ppu.move_camera(dx, dy);
            }
            Op::Bnk => {
                let bank = self.imm8(operands, 0);
                self.bus.borrow_mut().select_bank(bank as usize);
            }
            Op::Out => {
                let a = self.reg_high(operands);
                tracing::info!("[OUT] R{} = {:#06X} ({})", a, self.regs[a], self.regs[a]);
            }
            Op::Outs => {
                let addr = self.imm16(operands, 0);
                let text = self.bus.borrow().read_string(addr, 256);
                tracing::info!("[OUT] {}", text);
            }
            Op::Sprc => {
                let a = self.reg_high(operands);
                let cursor = self.regs[a];
                self.bus.borrow_mut().set_oam_cursor(cursor);
            }

            Op::ClsAll => self.bus.borrow_mut().clear_all(),
            Op::MuteAll => self.bus.borrow_mut().mute_all(),
            Op::Ldmb => {
                let addr = self.imm16(operands, 0);
                self.regs[r] = self.read_byte(addr) as u16;
            }
            Op::Stmb => {
                let addr = self.imm16(operands, 0);
                self.write_byte(addr, self.regs[r] as u8);
            }
            Op::Ldpb => {
                let (a, b) = self.reg_pair(operands);
                self.regs[a] = self.read_byte(self.regs[b]) as u16;
            }
            Op::Stpb => {
                let (a, b) = self.reg_pair(operands);
                self.write_byte(self.regs[b], self.regs[a] as u8);
            }
            Op::SetCrsR => {
                let dx = self.imm8(operands, 0) as i8 as i16;
                let dy = self.imm8(operands, 1) as i8 as i16;
                self.bus.borrow_mut().ppu.move_cursor(dx, dy);
            }
            Op::AddP => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                let addr = self.regs[a];
                let value = self.read_word(addr);
                let result = self.flags_add(value, imm, false);
                self.write_word(addr, result);
            }
            Op::SubP => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                let addr = self.regs[a];
                let value = self.read_word(addr);
                let result = self.flags_sub(value, imm);
                self.write_word(addr, result);
            }
            Op::CmpP => {
                let a = self.reg_high(operands);
                let imm = self.imm16(operands, 1);
                let value = self.read_word(self.regs[a]);
                self.flags_sub(value, imm);
            }
        }
    }

    fn branch(&self, operands: u16, next: &mut u16, taken: bool) {
        if taken {
            *next = self.imm16(operands, 0);
        }
    }

    // --- flag arithmetic ---

    fn flags_add(&mut self, a: u16, b: u16, carry_in: bool) -> u16 {
        let raw = a as u32 + b as u32 + carry_in as u32;
        let result = raw as u16;
        self.flags.set_carry(raw > 0xFFFF);
        self.flags.set_zero(result == 0);
        self.flags.set_negative(result & 0x8000 != 0);
        self.flags
            .set_overflow((a ^ result) & (b ^ result) & 0x8000 != 0);
        result
    }

    fn flags_sub(&mut self, a: u16, b: u16) -> u16 {
        let result = a.wrapping_sub(b);
        self.flags.set_carry(a < b);
        self.flags.set_zero(result == 0);
        self.flags.set_negative(result & 0x8000 != 0);
        self.flags
            .set_overflow((a ^ b) & (a ^ result) & 0x8000 != 0);
        result
    }

    fn flags_mul(&mut self, a: u16, b: u16) -> u16 {
        let raw = a as u32 * b as u32;
        let result = raw as u16;
        self.flags.set_carry(raw > 0xFFFF);
        self.flags.set_overflow(raw > 0xFFFF);
        self.flags.set_zero(result == 0);
        self.flags.set_negative(result & 0x8000 != 0);
        result
    }

    /// Quotient or remainder; division by zero yields 0 with Zero and
    /// Overflow forced on, Carry and Negative cleared. Not a halt.
    fn flags_div(&mut self, a: u16, b: u16, remainder: bool) -> u16 {
        if b == 0 {
            self.flags.set_zero(true);
            self.flags.set_overflow(true);
            self.flags.set_carry(false);
            self.flags.set_negative(false);
            return 0;
        }
        let result = if remainder { a % b } else { a / b };
        self.flags.set_zero(result == 0);
        self.flags.set_negative(result & 0x8000 != 0);
        self.flags.set_overflow(false);
        self.flags.set_carry(false);
        result
    }

    /// Zero/Negative from the result, Overflow cleared, Carry untouched.
    fn flags_logic(&mut self, result: u16) -> u16 {
        self.flags.set_zero(result == 0);
        self.flags.set_negative(result & 0x8000 != 0);
        self.flags.set_overflow(false);
        result
    }
}
