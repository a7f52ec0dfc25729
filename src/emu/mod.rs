mod chip8;
mod display;
mod execute;
mod font;
mod opcode;
mod runner;
mod types;

pub use chip8::*;
pub use display::*;
pub use font::*;
pub use opcode::*;
pub use runner::*;
pub use types::*;
