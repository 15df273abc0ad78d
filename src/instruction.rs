//! Opcode decoding and disassembly.
//!
//! The primary table covers one-byte opcodes; 0xFE escapes into the ALT
//! table for the wide (banked / pointer-pair) forms. Family opcodes
//! carry their register in the low nibble of the opcode byte itself.
//! Mnemonic strings use `$r` for that register and `$1`, `$2`, ... for
//! operand bytes, substituted by [`Decoded::describe`].

use std::fmt;

use once_cell::sync::Lazy;

/// Escape byte selecting the ALT opcode table.
pub const PREFIX: u8 = 0xFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Vblank,
    Cls,
    Ret,
    Mute,
    Halt,
    // register families
    Ldi,
    Ldm,
    Stm,
    Rnd,
    Draw,
    Song,
    Instr,
    // register-register ALU
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Cmp,
    Adc,
    Ldp,
    Stp,
    // single register
    Inc,
    Dec,
    Neg,
    Not,
    Shl,
    Shr,
    // immediate ALU
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,
    AndI,
    OrI,
    XorI,
    CmpI,
    // control flow
    Jmp,
    Jeq,
    Jne,
    Jgt,
    Jlt,
    Jge,
    Jle,
    Call,
    // device
    Play,
    Stop,
    Input,
    Text,
    Attr,
    SetCrs,
    Swc,
    Col,
    Cam,
    Mcam,
    Bnk,
    Out,
    Outs,
    Sprc,
    // ALT table
    ClsAll,
    MuteAll,
    Ldmb,
    Stmb,
    Ldpb,
    Stpb,
    SetCrsR,
    AddP,
    SubP,
    CmpP,
}

/// One decoded opcode: the operation, the register nibble for family
/// opcodes (0 otherwise), and the full instruction length in bytes
/// (prefix included for ALT forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub op: Op,
    pub reg: u8,
    pub len: u16,
    pub mnemonic: &'static str,
}

impl Decoded {
    /// Number of operand bytes following the opcode (and prefix).
    pub fn operand_len(&self) -> u16 {
        let header = if matches!(
            self.op,
            Op::ClsAll
                | Op::MuteAll
                | Op::Ldmb
                | Op::Stmb
                | Op::Ldpb
                | Op::Stpb
                | Op::SetCrsR
                | Op::AddP
                | Op::SubP
                | Op::CmpP
        ) {
            2
        } else {
            1
        };
        self.len - header
    }

    /// Renders the mnemonic with `$r` and `$n` placeholders filled from
    /// the operand bytes.
    pub fn describe(&self, args: &[u8]) -> String {
        let mut out = self.mnemonic.replace("$r", &self.reg.to_string());
        for (i, byte) in args.iter().enumerate() {
            out = out.replace(&format!("${}", i + 1), &format!("{:02X}", byte));
        }
        out
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)
    }
}

fn def(op: Op, reg: u8, len: u16, mnemonic: &'static str) -> Decoded {
    Decoded {
        op,
        reg,
        len,
        mnemonic,
    }
}

/// Primary table, one entry per opcode byte. Unassigned opcodes (and
/// the 0xFE prefix, which callers handle first) hold None.
static PRIMARY: Lazy<[Option<Decoded>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for (opcode, slot) in table.iter_mut().enumerate() {
        *slot = primary_def(opcode as u8);
    }
    table
});

static ALT: Lazy<[Option<Decoded>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for (opcode, slot) in table.iter_mut().enumerate() {
        *slot = alt_def(opcode as u8);
    }
    table
});

pub fn decode(opcode: u8) -> Option<Decoded> {
    PRIMARY[opcode as usize]
}

pub fn decode_alt(opcode: u8) -> Option<Decoded> {
    ALT[opcode as usize]
}

fn primary_def(opcode: u8) -> Option<Decoded> {
    let reg = opcode & 0x0F;
    Some(match opcode {
        0x00 => def(Op::Nop, 0, 1, "NOP"),
        0x01 => def(Op::Vblank, 0, 1, "VBLNK"),
        0x02 => def(Op::Cls, 0, 1, "CLS"),
        0x03 => def(Op::Ret, 0, 1, "RET"),
        0x04 => def(Op::Mute, 0, 1, "MUTE"),

        0x10..=0x1F => def(Op::Ldi, reg, 3, "LDI R$r, $2$1"),
        0x20..=0x2F => def(Op::Ldm, reg, 3, "LDM R$r, ($2$1)"),
        0x30..=0x3F => def(Op::Stm, reg, 3, "STM ($2$1), R$r"),
        0x40..=0x4F => def(Op::Rnd, reg, 2, "RND R$r, $1"),
        0x50..=0x5F => def(Op::Draw, reg, 4, "DRAW R$r, $1, $2, $3"),
        0x60..=0x6F => def(Op::Song, reg, 1, "SONG R$r"),
        0x70..=0x7F => def(Op::Instr, reg, 2, "INSTR R$r, $1"),

        0x80 => def(Op::Mov, 0, 2, "MOV $1"),
        0x81 => def(Op::Add, 0, 2, "ADD $1"),
        0x82 => def(Op::Sub, 0, 2, "SUB $1"),
        0x83 => def(Op::Mul, 0, 2, "MUL $1"),
        0x84 => def(Op::Div, 0, 2, "DIV $1"),
        0x85 => def(Op::Mod, 0, 2, "MOD $1"),
        0x86 => def(Op::And, 0, 2, "AND $1"),
        0x87 => def(Op::Or, 0, 2, "OR $1"),
        0x88 => def(Op::Xor, 0, 2, "XOR $1"),
        0x89 => def(Op::Cmp, 0, 2, "CMP $1"),
        0x8A => def(Op::Adc, 0, 2, "ADC $1"),
        0x8B => def(Op::Ldp, 0, 2, "LDP $1"),
        0x8C => def(Op::Stp, 0, 2, "STP $1"),

        0x90 => def(Op::Inc, 0, 2, "INC $1"),
        0x91 => def(Op::Dec, 0, 2, "DEC $1"),
        0x92 => def(Op::Neg, 0, 2, "NEG $1"),
        0x93 => def(Op::Not, 0, 2, "NOT $1"),
        0x94 => def(Op::Shl, 0, 2, "SHL $1"),
        0x95 => def(Op::Shr, 0, 2, "SHR $1"),

        0xA0 => def(Op::AddI, 0, 4, "ADDI $1, $3$2"),
        0xA1 => def(Op::SubI, 0, 4, "SUBI $1, $3$2"),
        0xA2 => def(Op::MulI, 0, 4, "MULI $1, $3$2"),
        0xA3 => def(Op::DivI, 0, 4, "DIVI $1, $3$2"),
        0xA4 => def(Op::ModI, 0, 4, "MODI $1, $3$2"),
        0xA5 => def(Op::AndI, 0, 4, "ANDI $1, $3$2"),
        0xA6 => def(Op::OrI, 0, 4, "ORI $1, $3$2"),
        0xA7 => def(Op::XorI, 0, 4, "XORI $1, $3$2"),
        0xA8 => def(Op::CmpI, 0, 4, "CMPI $1, $3$2"),

        0xB0 => def(Op::Jmp, 0, 3, "JMP $2$1"),
        0xB1 => def(Op::Jeq, 0, 3, "JEQ $2$1"),
        0xB2 => def(Op::Jne, 0, 3, "JNE $2$1"),
        0xB3 => def(Op::Jgt, 0, 3, "JGT $2$1"),
        0xB4 => def(Op::Jlt, 0, 3, "JLT $2$1"),
        0xB5 => def(Op::Jge, 0, 3, "JGE $2$1"),
        0xB6 => def(Op::Jle, 0, 3, "JLE $2$1"),
        0xB7 => def(Op::Call, 0, 3, "CALL $2$1"),

        0xC0 => def(Op::Play, 0, 3, "PLAY $1, $2"),
        0xC1 => def(Op::Stop, 0, 2, "STOP $1"),
        0xC2 => def(Op::Input, 0, 2, "INPUT $1"),
        0xC3 => def(Op::Text, 0, 2, "TEXT $1"),
        0xC4 => def(Op::Attr, 0, 2, "ATTR $1"),
        0xC5 => def(Op::SetCrs, 0, 3, "SETCRS $1, $2"),
        0xC6 => def(Op::Swc, 0, 3, "SWC $1, $2"),
        0xC7 => def(Op::Col, 0, 2, "COL $1"),
        0xC8 => def(Op::Cam, 0, 2, "CAM $1"),
        0xC9 => def(Op::Mcam, 0, 2, "MCAM $1"),
        0xCA => def(Op::Bnk, 0, 2, "BNK $1"),
        0xCB => def(Op::Out, 0, 2, "OUT $1"),
        0xCC => def(Op::Outs, 0, 3, "OUTS $2$1"),
        0xCD => def(Op::Sprc, 0, 2, "SPRC $1"),

        0xFF => def(Op::Halt, 0, 1, "HALT"),
        _ => return None,
    })
}

/// ALT defs, reached through the 0xFE prefix. Lengths include the
/// prefix byte.
fn alt_def(opcode: u8) -> Option<Decoded> {
    let reg = opcode & 0x0F;
    Some(match opcode {
        0x00 => def(Op::ClsAll, 0, 2, "CLSA"),
        0x01 => def(Op::MuteAll, 0, 2, "MUTEA"),
        0x10..=0x1F => def(Op::Ldmb, reg, 4, "LDMB R$r, ($2$1)"),
        0x20..=0x2F => def(Op::Stmb, reg, 4, "STMB ($2$1), R$r"),
        0x30 => def(Op::Ldpb, 0, 3, "LDPB $1"),
        0x31 => def(Op::Stpb, 0, 3, "STPB $1"),
        0x40 => def(Op::SetCrsR, 0, 4, "SETCRSR $1, $2"),
        0x60 => def(Op::AddP, 0, 5, "ADDP $1, $3$2"),
        0x61 => def(Op::SubP, 0, 5, "SUBP $1, $3$2"),
        0x62 => def(Op::CmpP, 0, 5, "CMPP $1, $3$2"),
        _ => return None,
    })
}

/// Disassembles the instruction starting at `bytes[0]`, for trace logs
/// and debugger views. Returns the text and the byte length consumed.
pub fn disassemble(bytes: &[u8]) -> (String, u16) {
    let Some(&opcode) = bytes.first() else {
        return ("??".into(), 1);
    };
    if opcode == PREFIX {
        let Some(decoded) = bytes.get(1).copied().and_then(decode_alt) else {
            return (format!("DB {:02X} {:02X?}", PREFIX, bytes.get(1)), 2);
        };
        let args = &bytes[2..(decoded.len as usize).min(bytes.len())];
        return (decoded.describe(args), decoded.len);
    }
    match decode(opcode) {
        Some(decoded) => {
            let args = &bytes[1..(decoded.len as usize).min(bytes.len())];
            (decoded.describe(args), decoded.len)
        }
        None => (format!("DB {:02X}", opcode), 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_register_nibble() {
        let d = decode(0x13).unwrap();
        assert_eq!(d.op, Op::Ldi);
        assert_eq!(d.reg, 3);
        assert_eq!(d.len, 3);

        let d = decode(0x5F).unwrap();
        assert_eq!(d.op, Op::Draw);
        assert_eq!(d.reg, 15);
        assert_eq!(d.len, 4);
    }

    #[test]
    fn test_describe_substitutes_args() {
        let d = decode(0x12).unwrap();
        assert_eq!(d.describe(&[0x34, 0x12]), "LDI R2, 1234");

        let (text, len) = disassemble(&[0xB0, 0x00, 0x40]);
        assert_eq!(text, "JMP 4000");
        assert_eq!(len, 3);
    }

    #[test]
    fn test_alt_table_lengths_include_prefix() {
        assert_eq!(decode_alt(0x00).unwrap().len, 2);
        assert_eq!(decode_alt(0x12).unwrap().len, 4);
        assert_eq!(decode_alt(0x60).unwrap().len, 5);
        assert!(decode_alt(0x50).is_none());
    }

    #[test]
    fn test_unassigned_opcodes_decode_to_none() {
        assert!(decode(0x05).is_none());
        assert!(decode(0x96).is_none());
        assert!(decode(0xCE).is_none());
        assert!(decode(PREFIX).is_none());
    }
}
