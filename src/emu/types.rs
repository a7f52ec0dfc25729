use std::path::PathBuf;

/// Result of a single CHIP-8 instruction step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip8Result {
    /// The instruction completed and PC moved on.
    Continue,
    /// Fx0A found no pressed key; PC was rewound so the same instruction runs again next step.
    WaitingForKey,
}

/// Errors reported while stepping the CHIP-8 CPU
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Chip8Error {
    #[error("Stack overflow: too many nested subroutine calls at {pc:#05X}")]
    StackOverflow { pc: u16 },

    #[error("Stack underflow: attempted to return from a subroutine with empty call stack at {pc:#05X}")]
    StackUnderflow { pc: u16 },

    #[error("Unknown opcode {opcode:#06X} at {pc:#05X}")]
    UnknownOpcode { opcode: u16, pc: u16 },
}

/// Errors reported while loading a program image
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("ROM is too large ({size} bytes), max size is {max_size} bytes")]
    ImageTooLarge { size: usize, max_size: usize },

    #[error("Failed to read ROM file {}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub const DISPLAY_X: usize = 64;
pub const DISPLAY_Y: usize = 32;
/// A type alias for the CHIP-8 display buffer representation
pub type Display<T> = [[T; DISPLAY_X]; DISPLAY_Y];
