use rand::Rng;

use super::{
    Chip8, Chip8Error, Chip8Result, FONT_GLYPH_SIZE, FONT_START_ADDRESS, Opcode, OpcodeALU,
    STACK_SIZE, chip8::ADDRESS_MASK,
};
use crate::u4;

impl Chip8 {
    pub(crate) fn execute(&mut self, opcode: Opcode) -> Result<Chip8Result, Chip8Error> {
        self.pc = self.pc.wrapping_add(2);

        match opcode {
            Opcode::ClearDisplay => {
                self.display.clear();
            }
            Opcode::Jump { nnn } => {
                self.pc = nnn;
            }
            Opcode::JumpWithOffset { nnn } => {
                self.pc = nnn.wrapping_add(self.v[0].into());
            }
            Opcode::Call { nnn } => {
                if self.sp >= STACK_SIZE {
                    let pc = self.instruction_addr();
                    log::warn!("Stack overflow at {pc:#05X}");
                    return Err(Chip8Error::StackOverflow { pc });
                }
                self.stack[self.sp] = self.pc;
                self.sp += 1;
                self.pc = nnn;
            }
            Opcode::Return => {
                if self.sp == 0 {
                    let pc = self.instruction_addr();
                    log::warn!("Stack underflow at {pc:#05X}");
                    return Err(Chip8Error::StackUnderflow { pc });
                }
                self.sp -= 1;
                self.pc = self.stack[self.sp];
            }
            Opcode::SkipRegEqualImm { x, nn } => {
                self.skip_if(self.v[x] == nn);
            }
            Opcode::SkipRegNotEqualImm { x, nn } => {
                self.skip_if(self.v[x] != nn);
            }
            Opcode::SkipRegEqualReg { x, y } => {
                self.skip_if(self.v[x] == self.v[y]);
            }
            Opcode::SkipRegNotEqualReg { x, y } => {
                self.skip_if(self.v[x] != self.v[y]);
            }
            Opcode::SetRegImm { x, nn } => {
                self.v[x] = nn;
            }
            Opcode::AddRegImm { x, nn } => {
                self.v[x] = self.v[x].wrapping_add(nn);
            }
            Opcode::ALU { x, y, op } => {
                self.execute_alu(x, y, op);
            }
            Opcode::Random { x, nn } => {
                let rand_byte: u8 = self.rng.random();
                self.v[x] = rand_byte & nn;
            }
            Opcode::SetIndexImm { nnn } => {
                self.i = nnn;
            }
            Opcode::AddIndexReg { x } => {
                self.i = self.i.wrapping_add(self.v[x].into());
            }
            Opcode::Draw { x, y, n } => {
                self.execute_draw(x, y, n);
            }
            Opcode::SkipIfPressed { x } => {
                self.skip_if(self.keypad[u4::from_low(self.v[x])]);
            }
            Opcode::SkipIfNotPressed { x } => {
                self.skip_if(!self.keypad[u4::from_low(self.v[x])]);
            }
            Opcode::WaitForKey { x } => {
                return Ok(self.execute_wait_for_key(x));
            }
            Opcode::ReadDelayTimer { x } => {
                self.v[x] = self.delay_timer;
            }
            Opcode::SetDelayTimer { x } => {
                self.delay_timer = self.v[x];
            }
            Opcode::SetSoundTimer { x } => {
                self.sound_timer = self.v[x];
            }
            Opcode::FontChar { x } => {
                let digit = (self.v[x] & 0x0F) as usize;
                self.i = (FONT_START_ADDRESS + digit * FONT_GLYPH_SIZE) as u16;
            }
            Opcode::BCD { x } => {
                let value = self.v[x];
                *self.mem_mut(self.i) = value / 100;
                *self.mem_mut(self.i.wrapping_add(1)) = (value / 10) % 10;
                *self.mem_mut(self.i.wrapping_add(2)) = value % 10;
            }
            Opcode::StoreRegs { x } => {
                // I ends up past the last register written (x + 1)
                for reg_index in 0..=usize::from(x) {
                    *self.mem_mut(self.i) = self.v[reg_index];
                    self.i = self.i.wrapping_add(1);
                }
            }
            Opcode::LoadRegs { x } => {
                for reg_index in 0..=usize::from(x) {
                    self.v[reg_index] = self.mem(self.i);
                    self.i = self.i.wrapping_add(1);
                }
            }
            Opcode::Unknown(opcode) => {
                let pc = self.instruction_addr();
                if self.strict {
                    return Err(Chip8Error::UnknownOpcode { opcode, pc });
                }
                log::trace!("Skipping unknown opcode {opcode:#06X} at {pc:#05X}");
            }
        };

        Ok(Chip8Result::Continue)
    }

    /// Address of the instruction currently being executed (PC has already moved past it).
    fn instruction_addr(&self) -> u16 {
        self.pc.wrapping_sub(2) & ADDRESS_MASK
    }

    fn skip_if(&mut self, condition: bool) {
        if condition {
            self.pc = self.pc.wrapping_add(2);
        }
    }

    fn execute_alu(&mut self, x: u4, y: u4, op: OpcodeALU) {
        match op {
            OpcodeALU::Set => self.v[x] = self.v[y],
            OpcodeALU::Or => self.v[x] |= self.v[y],
            OpcodeALU::And => self.v[x] &= self.v[y],
            OpcodeALU::Xor => self.v[x] ^= self.v[y],
            OpcodeALU::Add => {
                let (res, overflow) = self.v[x].overflowing_add(self.v[y]);
                self.v[x] = res;
                self.v[0xF] = overflow as u8;
            }
            OpcodeALU::Sub => {
                let (res, borrow) = self.v[x].overflowing_sub(self.v[y]);
                self.v[x] = res;
                self.v[0xF] = !borrow as u8; // Notice that borrow is inverted
            }
            OpcodeALU::SubReverse => {
                let (res, borrow) = self.v[y].overflowing_sub(self.v[x]);
                self.v[x] = res;
                self.v[0xF] = !borrow as u8;
            }
            // Both shifts operate on Vx in place; Vy is ignored
            OpcodeALU::ShiftRight => {
                let lsb = self.v[x] & 1;
                self.v[x] >>= 1;
                self.v[0xF] = lsb;
            }
            OpcodeALU::ShiftLeft => {
                let msb = (self.v[x] >> 7) & 1;
                self.v[x] <<= 1;
                self.v[0xF] = msb;
            }
        }
    }

    fn execute_draw(&mut self, x: u4, y: u4, n: u4) {
        let mut rows = [0u8; 16];
        let rows = &mut rows[..usize::from(n)];
        for (offset, row) in rows.iter_mut().enumerate() {
            *row = self.mem(self.i.wrapping_add(offset as u16));
        }

        let any_erased = self.display.draw_sprite(self.v[x], self.v[y], rows);
        self.v[0xF] = any_erased as u8;
    }

    fn execute_wait_for_key(&mut self, x: u4) -> Chip8Result {
        // The scan runs over every key, so the highest pressed index wins
        let mut pressed = None;
        for key in 0..16u8 {
            if self.keypad[key as usize] {
                pressed = Some(key);
            }
        }

        match pressed {
            Some(key) => {
                self.v[x] = key;
                Chip8Result::Continue
            }
            None => {
                // Repeat this instruction until a key is pressed
                self.pc = self.pc.wrapping_sub(2);
                Chip8Result::WaitingForKey
            }
        }
    }
}
