pub mod debugger;
pub mod emu;
mod nibble;
pub mod roms;

pub use emu::*;
pub use nibble::u4;
pub use roms::RomLibrary;
