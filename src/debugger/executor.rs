use std::collections::HashSet;

use super::commands::{BreakpointAction, Command, CommandError, CommandResult, SetTarget};
use crate::emu::{Chip8Error, Chip8Runner, Display, MEMORY_SIZE, Opcode, RunnerResult};

pub struct Executor {
    runner: Chip8Runner,
    rom: Vec<u8>,
    breakpoints: HashSet<u16>,
    /// Last engine error; stays until the program is reset, resumed or edited.
    fault: Option<Chip8Error>,
}

impl Executor {
    /// Takes a runner with `rom` already loaded; the debugger starts paused.
    pub fn new(mut runner: Chip8Runner, rom: Vec<u8>) -> Self {
        runner.pause();

        Self {
            runner,
            rom,
            breakpoints: HashSet::new(),
            fault: None,
        }
    }

    /// Handles execution while the debugger is in running mode.
    pub fn poll(&mut self, dt: f32) -> Result<RunnerResult, Chip8Error> {
        let result = self
            .runner
            .update_with_breakpoints(dt, Some(&self.breakpoints));

        match &result {
            Ok(RunnerResult::Ok) => {}
            Ok(RunnerResult::HitBreakpoint) => self.runner.pause(),
            Err(e) => {
                self.fault = Some(e.clone());
                self.runner.pause();
            }
        }

        result
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandResult, CommandError> {
        match command {
            Command::Run => {
                self.execute_run();
                Ok(CommandResult::Ok)
            }
            Command::Pause => {
                self.execute_pause();
                Ok(CommandResult::Ok)
            }
            Command::Step { count } => self.execute_step(count),
            Command::Breakpoint { action } => self.handle_breakpoint(action),
            Command::Set { target, value } => self.handle_set(target, value),
            Command::Mem { start, len } => Ok(self.handle_mem(start, len)),
            Command::Disasm { start, len } => Ok(self.handle_disasm(start, len)),
            Command::Speed { speed } => {
                self.runner.set_speed(speed);
                Ok(CommandResult::Ok)
            }
            Command::Reset => {
                self.runner.load(&self.rom)?;
                self.fault = None;
                Ok(CommandResult::Ok)
            }
            Command::Quit => Ok(CommandResult::Quit),
        }
    }

    pub fn execute_run(&mut self) {
        self.fault = None;
        self.runner.resume();
    }

    pub fn execute_pause(&mut self) {
        self.runner.pause();
    }

    pub fn execute_step(&mut self, count: u32) -> Result<CommandResult, CommandError> {
        for _ in 0..count {
            if let Err(e) = self.runner.step() {
                self.fault = Some(e.clone());
                return Err(e.into());
            }
        }
        Ok(CommandResult::Ok)
    }

    pub fn is_running(&self) -> bool {
        !self.runner.is_paused()
    }

    pub fn is_waiting_for_key(&self) -> bool {
        self.runner.is_waiting_for_key()
    }

    /// The error that last stopped the program, if it hasn't been cleared.
    pub fn fault(&self) -> Option<&Chip8Error> {
        self.fault.as_ref()
    }

    pub fn get_display(&self) -> &Display<bool> {
        self.runner.chip8_ref().display()
    }

    pub fn get_pc(&self) -> u16 {
        self.runner.chip8_ref().pc()
    }

    pub fn get_i(&self) -> u16 {
        self.runner.chip8_ref().i()
    }

    pub fn get_v(&self) -> &[u8; 16] {
        self.runner.chip8_ref().v()
    }

    pub fn get_stack(&self) -> &[u16] {
        self.runner.chip8_ref().stack()
    }

    pub fn get_delay_timer(&self) -> u8 {
        self.runner.chip8_ref().delay_timer()
    }

    pub fn get_sound_timer(&self) -> u8 {
        self.runner.chip8_ref().sound_timer()
    }

    pub fn get_keypad(&self) -> &[bool; 16] {
        self.runner.chip8_ref().keypad()
    }

    pub fn breakpoints(&self) -> &HashSet<u16> {
        &self.breakpoints
    }

    pub fn runner_ref(&self) -> &Chip8Runner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut Chip8Runner {
        &mut self.runner
    }

    fn handle_breakpoint(
        &mut self,
        action: BreakpointAction,
    ) -> Result<CommandResult, CommandError> {
        match action {
            BreakpointAction::Set { addr } => {
                self.breakpoints.insert(addr);
            }
            BreakpointAction::Clear { addr } => {
                self.breakpoints.remove(&addr);
            }
            BreakpointAction::ClearAll => {
                self.breakpoints.clear();
            }
            BreakpointAction::List => {
                let mut bps: Vec<u16> = self.breakpoints.iter().cloned().collect();
                bps.sort();
                return Ok(CommandResult::Breakpoints(bps));
            }
        };

        Ok(CommandResult::Ok)
    }

    fn handle_set(&mut self, target: SetTarget, value: u16) -> Result<CommandResult, CommandError> {
        let chip8 = self.runner.chip8_mut();

        match target {
            SetTarget::V(reg) => {
                let value = u8::try_from(value).map_err(|_| CommandError::ValueOutOfRange)?;
                chip8.set_v(reg, value);
            }
            SetTarget::I => {
                chip8.set_i(value);
            }
            SetTarget::Pc => {
                chip8.set_pc(value);
            }
        }

        self.fault = None;
        Ok(CommandResult::Ok)
    }

    /// Dumps memory, clipped to the end of the address space.
    fn handle_mem(&self, start: u16, len: u16) -> CommandResult {
        let memory = self.runner.chip8_ref().memory();
        let start = (start as usize).min(MEMORY_SIZE);
        let end = (start + len as usize).min(MEMORY_SIZE);

        CommandResult::MemDump {
            data: memory[start..end].to_vec(),
            offset: start as u16,
        }
    }

    /// Decodes `len` instructions starting at `start` (or PC).
    fn handle_disasm(&self, start: Option<u16>, len: u16) -> CommandResult {
        let offset = start.unwrap_or_else(|| self.get_pc());

        CommandResult::Disasm {
            instructions: self.disassemble(offset, len),
            offset,
        }
    }

    /// Decodes `len` consecutive words from `start`, wrapping at the end of memory.
    pub fn disassemble(&self, start: u16, len: u16) -> Vec<(u16, Opcode)> {
        let memory = self.runner.chip8_ref().memory();

        (0..len)
            .map(|idx| {
                let addr = start.wrapping_add(idx.wrapping_mul(2)) as usize;
                let word = u16::from_be_bytes([
                    memory[addr % MEMORY_SIZE],
                    memory[(addr + 1) % MEMORY_SIZE],
                ]);
                (word, Opcode::decode(word))
            })
            .collect()
    }
}
