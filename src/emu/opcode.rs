use std::fmt;

use crate::u4;

/// CHIP-8 instruction opcodes.
///
/// The fields (x, y, n, nn, nnn) correspond to the operands encoded in the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// 1nnn - Jump to location nnn.
    Jump { nnn: u16 },
    /// Bnnn - Jump to location nnn + V0.
    JumpWithOffset { nnn: u16 },

    /// 2nnn - Call subroutine at nnn.
    Call { nnn: u16 },
    /// 00EE - Return from a subroutine.
    Return,

    /// 3xnn - Skip next instruction if Vx == nn.
    SkipRegEqualImm { x: u4, nn: u8 },
    /// 4xnn - Skip next instruction if Vx != nn.
    SkipRegNotEqualImm { x: u4, nn: u8 },
    /// 5xy_ - Skip next instruction if Vx == Vy.
    SkipRegEqualReg { x: u4, y: u4 },
    /// 9xy_ - Skip next instruction if Vx != Vy.
    SkipRegNotEqualReg { x: u4, y: u4 },

    /// 6xnn - Set Vx = nn.
    SetRegImm { x: u4, nn: u8 },
    /// 7xnn - Set Vx = Vx + nn.
    AddRegImm { x: u4, nn: u8 },
    /// Annn - Set I = nnn.
    SetIndexImm { nnn: u16 },
    /// Fx1E - Set I = I + Vx.
    AddIndexReg { x: u4 },

    /// 8xyN - ALU operations
    ALU { x: u4, y: u4, op: OpcodeALU },
    /// Cxnn - Set Vx = random byte AND nn.
    Random { x: u4, nn: u8 },

    /// 00E0 - Clear the display.
    ClearDisplay,
    /// Dxyn - Display sprite.
    Draw { x: u4, y: u4, n: u4 },

    /// Ex9E - Skip next instruction if key with the value of Vx is pressed.
    SkipIfPressed { x: u4 },
    /// ExA1 - Skip next instruction if key with the value of Vx is not pressed.
    SkipIfNotPressed { x: u4 },
    /// Fx0A - Wait for a key press, store the value of the key in Vx.
    ///
    /// This is the only instruction that suspends the program between steps:
    /// while no key is down it rewinds PC onto itself.
    WaitForKey { x: u4 },

    /// Fx07 - Set Vx = delay timer value.
    ReadDelayTimer { x: u4 },
    /// Fx15 - Set delay timer = Vx.
    SetDelayTimer { x: u4 },
    /// Fx18 - Set sound timer = Vx.
    SetSoundTimer { x: u4 },

    /// Fx29 - Set I = location of sprite for digit Vx.
    FontChar { x: u4 },
    /// Fx33 - Store BCD representation of Vx in memory locations I, I+1, and I+2.
    BCD { x: u4 },

    /// Fx55 - Store registers V0 through Vx in memory starting at location I.
    StoreRegs { x: u4 },
    /// Fx65 - Read registers V0 through Vx from memory starting at location I.
    LoadRegs { x: u4 },

    /// Any word that is not one of the instructions above, including 0nnn machine calls.
    Unknown(u16),
}

/// ALU operations for the 8xyN instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeALU {
    /// 8xy0 - Vx = Vy
    Set,
    /// 8xy1 - Vx = Vx OR Vy
    Or,
    /// 8xy2 - Vx = Vx AND Vy
    And,
    /// 8xy3 - Vx = Vx XOR Vy
    Xor,
    /// 8xy4 - Vx = Vx + Vy
    Add,
    /// 8xy5 - Vx = Vx - Vy
    Sub,
    /// 8xy6 - Vx = Vx SHR 1 (Vy is ignored)
    ShiftRight,
    /// 8xy7 - Vx = Vy - Vx
    SubReverse,
    /// 8xyE - Vx = Vx SHL 1 (Vy is ignored)
    ShiftLeft,
}

impl Opcode {
    /// Decode a 16-bit raw opcode into an `Opcode` enum variant.
    pub fn decode(opcode: u16) -> Self {
        let nibble = (
            ((opcode & 0xF000) >> 12) as u8,
            ((opcode & 0x0F00) >> 8) as u8,
            ((opcode & 0x00F0) >> 4) as u8,
            (opcode & 0x000F) as u8,
        );

        let x = u4::new(nibble.1);
        let y = u4::new(nibble.2);
        let n = u4::new(nibble.3);
        let nn = (opcode & 0x00FF) as u8;
        let nnn = opcode & 0x0FFF;

        match (nibble.0, nibble.1, nibble.2, nibble.3) {
            (0x0, 0x0, 0xE, 0x0) => Opcode::ClearDisplay,
            (0x0, 0x0, 0xE, 0xE) => Opcode::Return,
            (0x1, _, _, _) => Opcode::Jump { nnn },
            (0x2, _, _, _) => Opcode::Call { nnn },
            (0x3, _, _, _) => Opcode::SkipRegEqualImm { x, nn },
            (0x4, _, _, _) => Opcode::SkipRegNotEqualImm { x, nn },
            // The low nibble of 5xy_ and 9xy_ is not checked
            (0x5, _, _, _) => Opcode::SkipRegEqualReg { x, y },
            (0x6, _, _, _) => Opcode::SetRegImm { x, nn },
            (0x7, _, _, _) => Opcode::AddRegImm { x, nn },
            (0x8, _, _, _) => Opcode::ALU {
                x,
                y,
                op: match nibble.3 {
                    0x0 => OpcodeALU::Set,
                    0x1 => OpcodeALU::Or,
                    0x2 => OpcodeALU::And,
                    0x3 => OpcodeALU::Xor,
                    0x4 => OpcodeALU::Add,
                    0x5 => OpcodeALU::Sub,
                    0x6 => OpcodeALU::ShiftRight,
                    0x7 => OpcodeALU::SubReverse,
                    0xE => OpcodeALU::ShiftLeft,
                    _ => return Opcode::Unknown(opcode),
                },
            },
            (0x9, _, _, _) => Opcode::SkipRegNotEqualReg { x, y },
            (0xA, _, _, _) => Opcode::SetIndexImm { nnn },
            (0xB, _, _, _) => Opcode::JumpWithOffset { nnn },
            (0xC, _, _, _) => Opcode::Random { x, nn },
            (0xD, _, _, _) => Opcode::Draw { x, y, n },
            (0xE, _, 0x9, 0xE) => Opcode::SkipIfPressed { x },
            (0xE, _, 0xA, 0x1) => Opcode::SkipIfNotPressed { x },
            (0xF, _, 0x0, 0xA) => Opcode::WaitForKey { x },
            (0xF, _, 0x0, 0x7) => Opcode::ReadDelayTimer { x },
            (0xF, _, 0x1, 0x5) => Opcode::SetDelayTimer { x },
            (0xF, _, 0x1, 0x8) => Opcode::SetSoundTimer { x },
            (0xF, _, 0x1, 0xE) => Opcode::AddIndexReg { x },
            (0xF, _, 0x2, 0x9) => Opcode::FontChar { x },
            (0xF, _, 0x3, 0x3) => Opcode::BCD { x },
            (0xF, _, 0x5, 0x5) => Opcode::StoreRegs { x },
            (0xF, _, 0x6, 0x5) => Opcode::LoadRegs { x },

            _ => Opcode::Unknown(opcode),
        }
    }
}

/// Assembler-style mnemonics, used by the debugger's disassembly view.
impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Opcode::ClearDisplay => write!(f, "CLS"),
            Opcode::Return => write!(f, "RET"),
            Opcode::Jump { nnn } => write!(f, "JP {nnn:03X}"),
            Opcode::JumpWithOffset { nnn } => write!(f, "JP V0, {nnn:03X}"),
            Opcode::Call { nnn } => write!(f, "CALL {nnn:03X}"),
            Opcode::SkipRegEqualImm { x, nn } => write!(f, "SE V{x:X}, {nn:02X}"),
            Opcode::SkipRegNotEqualImm { x, nn } => write!(f, "SNE V{x:X}, {nn:02X}"),
            Opcode::SkipRegEqualReg { x, y } => write!(f, "SE V{x:X}, V{y:X}"),
            Opcode::SkipRegNotEqualReg { x, y } => write!(f, "SNE V{x:X}, V{y:X}"),
            Opcode::SetRegImm { x, nn } => write!(f, "LD V{x:X}, {nn:02X}"),
            Opcode::AddRegImm { x, nn } => write!(f, "ADD V{x:X}, {nn:02X}"),
            Opcode::SetIndexImm { nnn } => write!(f, "LD I, {nnn:03X}"),
            Opcode::AddIndexReg { x } => write!(f, "ADD I, V{x:X}"),
            Opcode::ALU { x, y, op } => {
                let mnemonic = match op {
                    OpcodeALU::Set => "LD",
                    OpcodeALU::Or => "OR",
                    OpcodeALU::And => "AND",
                    OpcodeALU::Xor => "XOR",
                    OpcodeALU::Add => "ADD",
                    OpcodeALU::Sub => "SUB",
                    OpcodeALU::ShiftRight => return write!(f, "SHR V{x:X}"),
                    OpcodeALU::SubReverse => "SUBN",
                    OpcodeALU::ShiftLeft => return write!(f, "SHL V{x:X}"),
                };
                write!(f, "{mnemonic} V{x:X}, V{y:X}")
            }
            Opcode::Random { x, nn } => write!(f, "RND V{x:X}, {nn:02X}"),
            Opcode::Draw { x, y, n } => write!(f, "DRW V{x:X}, V{y:X}, {n:X}"),
            Opcode::SkipIfPressed { x } => write!(f, "SKP V{x:X}"),
            Opcode::SkipIfNotPressed { x } => write!(f, "SKNP V{x:X}"),
            Opcode::WaitForKey { x } => write!(f, "LD V{x:X}, K"),
            Opcode::ReadDelayTimer { x } => write!(f, "LD V{x:X}, DT"),
            Opcode::SetDelayTimer { x } => write!(f, "LD DT, V{x:X}"),
            Opcode::SetSoundTimer { x } => write!(f, "LD ST, V{x:X}"),
            Opcode::FontChar { x } => write!(f, "LD F, V{x:X}"),
            Opcode::BCD { x } => write!(f, "LD B, V{x:X}"),
            Opcode::StoreRegs { x } => write!(f, "LD [I], V{x:X}"),
            Opcode::LoadRegs { x } => write!(f, "LD V{x:X}, [I]"),
            Opcode::Unknown(opcode) => write!(f, "DW {opcode:04X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_operand_fields() {
        assert_eq!(
            Opcode::decode(0xD123),
            Opcode::Draw {
                x: u4::new(1),
                y: u4::new(2),
                n: u4::new(3)
            }
        );
        assert_eq!(Opcode::decode(0xA2F0), Opcode::SetIndexImm { nnn: 0x2F0 });
        assert_eq!(
            Opcode::decode(0x6A42),
            Opcode::SetRegImm {
                x: u4::new(0xA),
                nn: 0x42
            }
        );
    }

    #[test]
    fn decodes_alu_group() {
        let decoded = Opcode::decode(0x8AB4);
        assert_eq!(
            decoded,
            Opcode::ALU {
                x: u4::new(0xA),
                y: u4::new(0xB),
                op: OpcodeALU::Add
            }
        );
        assert_eq!(Opcode::decode(0x8AB8), Opcode::Unknown(0x8AB8));
    }

    #[test]
    fn register_skips_ignore_low_nibble() {
        assert!(matches!(
            Opcode::decode(0x5121),
            Opcode::SkipRegEqualReg { .. }
        ));
        assert!(matches!(
            Opcode::decode(0x912F),
            Opcode::SkipRegNotEqualReg { .. }
        ));
    }

    #[test]
    fn machine_calls_and_gaps_are_unknown() {
        assert_eq!(Opcode::decode(0x0123), Opcode::Unknown(0x0123));
        assert_eq!(Opcode::decode(0xE19F), Opcode::Unknown(0xE19F));
        assert_eq!(Opcode::decode(0xF0FF), Opcode::Unknown(0xF0FF));
    }

    #[test]
    fn formats_mnemonics() {
        assert_eq!(Opcode::decode(0x00E0).to_string(), "CLS");
        assert_eq!(Opcode::decode(0x2345).to_string(), "CALL 345");
        assert_eq!(Opcode::decode(0x8126).to_string(), "SHR V1");
        assert_eq!(Opcode::decode(0xF30A).to_string(), "LD V3, K");
        assert_eq!(Opcode::decode(0xFFFF).to_string(), "DW FFFF");
    }
}
