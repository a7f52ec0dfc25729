use std::path::Path;

use rand::{SeedableRng, rngs::StdRng};

use super::{
    Chip8Error, Chip8Result, Display, FONT, FONT_END_ADDRESS, FONT_START_ADDRESS, Framebuffer,
    LoadError, Opcode,
};
use crate::u4;

// Standard CHIP-8 memory layout
pub(crate) const ROM_START_ADDRESS: usize = 0x200;
pub const MEMORY_SIZE: usize = 4096;
/// Largest program image that fits between the start address and the end of memory.
pub const MAX_ROM_SIZE: usize = MEMORY_SIZE - ROM_START_ADDRESS;
pub const STACK_SIZE: usize = 16;
/// Every memory access is masked to 12 bits, so it always lands inside `memory`.
pub(crate) const ADDRESS_MASK: u16 = 0x0FFF;

/// CHIP-8 virtual machine state
pub struct Chip8 {
    /// 4KB memory array
    pub(crate) memory: [u8; MEMORY_SIZE],
    /// Display buffer: 64x32 monochrome pixels
    pub(crate) display: Framebuffer,

    /// Program counter: address of the next instruction to execute
    pub(crate) pc: u16,
    /// Index register: used for memory operations
    pub(crate) i: u16,
    /// General-purpose registers V0-VF (VF is used as a flag register)
    pub(crate) v: [u8; 16],
    /// Return addresses for subroutine calls
    pub(crate) stack: [u16; STACK_SIZE],
    /// Number of live entries in `stack`
    pub(crate) sp: usize,

    /// Delay timer: decrements at 60Hz until it reaches 0
    pub(crate) delay_timer: u8,
    /// Sound timer: decrements at 60Hz, beeps while non-zero
    pub(crate) sound_timer: u8,

    /// Keypad state: 16 keys mapped as booleans (true = pressed)
    pub(crate) keypad: [bool; 16],

    /// Source for Cxnn. Lives as long as the VM and is not reseeded by reset.
    pub(crate) rng: StdRng,
    /// Report unknown opcodes as errors instead of skipping them
    pub(crate) strict: bool,
}

impl Chip8 {
    /// Creates a VM whose random generator is seeded from the OS.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Creates a VM with a deterministic random sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let mut chip8 = Chip8 {
            memory: [0; MEMORY_SIZE],
            display: Framebuffer::new(),
            pc: ROM_START_ADDRESS as u16,
            i: 0,
            v: [0; 16],
            stack: [0; STACK_SIZE],
            sp: 0,
            delay_timer: 0,
            sound_timer: 0,
            keypad: [false; 16],
            rng,
            strict: false,
        };
        chip8.reset();
        chip8
    }

    /// Replaces the random generator with one seeded from `seed`.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// In strict mode an unknown opcode fails the step instead of being skipped.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Puts the machine back into its power-on state and reloads the font.
    pub fn reset(&mut self) {
        self.memory = [0; MEMORY_SIZE];
        self.memory[FONT_START_ADDRESS..FONT_END_ADDRESS].copy_from_slice(&FONT);
        self.display.reset();

        self.pc = ROM_START_ADDRESS as u16;
        self.i = 0;
        self.v = [0; 16];
        self.stack = [0; STACK_SIZE];
        self.sp = 0;

        self.delay_timer = 0;
        self.sound_timer = 0;
        self.keypad = [false; 16];

        log::debug!("CHIP-8 reset");
    }

    /// Resets the machine and loads a ROM at the program start address.
    ///
    /// An oversized ROM is rejected before anything is touched.
    pub fn load(&mut self, rom: &[u8]) -> Result<(), LoadError> {
        if rom.len() > MAX_ROM_SIZE {
            return Err(LoadError::ImageTooLarge {
                size: rom.len(),
                max_size: MAX_ROM_SIZE,
            });
        }

        self.reset();

        let rom_end = ROM_START_ADDRESS + rom.len();
        self.memory[ROM_START_ADDRESS..rom_end].copy_from_slice(rom);

        log::debug!("Loaded {} byte ROM at {:#05X}", rom.len(), ROM_START_ADDRESS);
        Ok(())
    }

    /// Reads a ROM from disk and loads it, see [`Chip8::load`].
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        let rom = std::fs::read(path).map_err(|source| LoadError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        self.load(&rom)
    }

    /// Executes a single CPU cycle (fetch, decode, execute).
    ///
    /// On error PC is left pointing at the faulting instruction.
    pub fn step(&mut self) -> Result<Chip8Result, Chip8Error> {
        let pc = self.pc;
        let opcode = self.fetch();
        let result = self.execute(Opcode::decode(opcode));

        if result.is_err() {
            self.pc = pc;
        }

        result
    }

    /// Updates the delay and sound timers. Should be called at 60Hz.
    pub fn tick(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Returns true while the sound timer is non-zero, i.e. a beep should be playing.
    pub fn sound_active(&self) -> bool {
        self.sound_timer > 0
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.keypad[key] = pressed;
    }

    /// Get the state of a pixel on the display (true = on, false = off).
    pub fn pixel(&self, y: usize, x: usize) -> bool {
        self.display.pixel(y, x)
    }

    pub fn display(&self) -> &Display<bool> {
        self.display.pixels()
    }

    /// Owned copy of the screen, for hosts that render on another thread.
    pub fn display_snapshot(&self) -> Display<bool> {
        *self.display.pixels()
    }

    pub fn is_display_changed(&self) -> bool {
        self.display.is_changed()
    }

    /// Returns whether the screen changed since the last call and clears the flag.
    pub fn take_display_changed(&mut self) -> bool {
        self.display.take_changed()
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn i(&self) -> u16 {
        self.i
    }

    pub fn v(&self) -> &[u8; 16] {
        &self.v
    }

    /// The live part of the call stack, oldest return address first.
    pub fn stack(&self) -> &[u16] {
        &self.stack[..self.sp]
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn keypad(&self) -> &[bool; 16] {
        &self.keypad
    }

    pub fn memory(&self) -> &[u8; MEMORY_SIZE] {
        &self.memory
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn set_i(&mut self, i: u16) {
        self.i = i;
    }

    pub fn set_v(&mut self, reg: u4, value: u8) {
        self.v[reg] = value;
    }

    /// Fetches the next 16-bit opcode from memory.
    fn fetch(&self) -> u16 {
        let high = self.mem(self.pc);
        let low = self.mem(self.pc.wrapping_add(1));

        u16::from_be_bytes([high, low])
    }

    pub(crate) fn mem(&self, addr: u16) -> u8 {
        self.memory[(addr & ADDRESS_MASK) as usize]
    }

    pub(crate) fn mem_mut(&mut self, addr: u16) -> &mut u8 {
        &mut self.memory[(addr & ADDRESS_MASK) as usize]
    }
}

impl Default for Chip8 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_machine_has_font_and_start_pc() {
        let chip8 = Chip8::with_seed(0);
        assert_eq!(chip8.pc(), 0x200);
        assert_eq!(&chip8.memory()[0x50..0xA0], &FONT[..]);
        assert_eq!(chip8.memory()[0x4F], 0);
        assert_eq!(chip8.memory()[0xA0], 0);
        assert!(chip8.stack().is_empty());
    }

    #[test]
    fn load_accepts_max_size_image() {
        let mut chip8 = Chip8::with_seed(0);
        let rom = vec![0xAB; MAX_ROM_SIZE];
        chip8.load(&rom).unwrap();

        assert_eq!(MAX_ROM_SIZE, 3584);
        assert_eq!(chip8.memory()[0x200], 0xAB);
        assert_eq!(chip8.memory()[0xFFF], 0xAB);
        assert_eq!(chip8.pc(), 0x200);
    }

    #[test]
    fn load_rejects_oversized_image_without_touching_state() {
        let mut chip8 = Chip8::with_seed(0);
        chip8.load(&[0x60, 0x05]).unwrap();
        chip8.step().unwrap();

        let err = chip8.load(&vec![0; MAX_ROM_SIZE + 1]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::ImageTooLarge {
                size: 3585,
                max_size: 3584
            }
        ));
        assert_eq!(chip8.v()[0], 0x05);
        assert_eq!(chip8.pc(), 0x202);
        assert_eq!(chip8.memory()[0x200], 0x60);
    }

    #[test]
    fn load_clears_previous_program() {
        let mut chip8 = Chip8::with_seed(0);
        chip8.load(&[0x11, 0x22, 0x33, 0x44]).unwrap();
        chip8.load(&[0x55]).unwrap();

        assert_eq!(chip8.memory()[0x200], 0x55);
        assert_eq!(&chip8.memory()[0x201..0x204], &[0, 0, 0]);
    }

    #[test]
    fn load_file_reports_missing_source() {
        let mut chip8 = Chip8::with_seed(0);
        let err = chip8
            .load_file("/definitely/not/a/real/rom.ch8")
            .unwrap_err();

        assert!(matches!(err, LoadError::SourceUnavailable { .. }));
        assert_eq!(chip8.pc(), 0x200);
    }

    #[test]
    fn reset_is_idempotent_mid_program() {
        let mut chip8 = Chip8::with_seed(0);
        chip8.load(&[0x60, 0x05, 0x22, 0x00]).unwrap();
        chip8.step().unwrap();
        chip8.step().unwrap();
        chip8.set_key(u4::new(3), true);
        chip8.sound_timer = 9;

        chip8.reset();
        chip8.reset();

        assert_eq!(chip8.pc(), 0x200);
        assert_eq!(chip8.v(), &[0; 16]);
        assert!(chip8.stack().is_empty());
        assert!(!chip8.keypad()[3]);
        assert!(!chip8.sound_active());
        assert!(!chip8.is_display_changed());
        assert_eq!(chip8.memory()[0x200], 0);
        assert_eq!(&chip8.memory()[0x50..0xA0], &FONT[..]);
    }

    #[test]
    fn timers_count_down_and_floor_at_zero() {
        let mut chip8 = Chip8::with_seed(0);
        chip8.delay_timer = 5;
        chip8.sound_timer = 2;

        for n in 1..=8u8 {
            chip8.tick();
            assert_eq!(chip8.delay_timer(), 5u8.saturating_sub(n));
        }

        assert_eq!(chip8.sound_timer(), 0);
        assert!(!chip8.sound_active());
    }

    #[test]
    fn sound_active_follows_sound_timer() {
        let mut chip8 = Chip8::with_seed(0);
        chip8.sound_timer = 1;
        assert!(chip8.sound_active());
        chip8.tick();
        assert!(!chip8.sound_active());
    }

    #[test]
    fn fetch_wraps_at_end_of_memory() {
        let mut chip8 = Chip8::with_seed(0);
        chip8.memory[0xFFF] = 0x12;
        chip8.memory[0x000] = 0x34;
        chip8.pc = 0xFFF;

        assert_eq!(chip8.fetch(), 0x1234);
    }
}
