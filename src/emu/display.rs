use super::{DISPLAY_X, DISPLAY_Y, Display};

/// Monochrome framebuffer with a "changed since last render" flag.
///
/// Only the CPU mutates it; hosts get read-only views.
#[derive(Clone)]
pub struct Framebuffer {
    pixels: Display<bool>,
    changed: bool,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self {
            pixels: [[false; DISPLAY_X]; DISPLAY_Y],
            changed: false,
        }
    }

    /// Turns every pixel off and raises the changed flag.
    pub(crate) fn clear(&mut self) {
        self.pixels = [[false; DISPLAY_X]; DISPLAY_Y];
        self.changed = true;
    }

    /// Back to the power-on state: blank and not changed.
    pub(crate) fn reset(&mut self) {
        self.pixels = [[false; DISPLAY_X]; DISPLAY_Y];
        self.changed = false;
    }

    /// XORs `rows` onto the screen with the top-left corner at (`x`, `y`).
    ///
    /// The origin wraps around the screen, the sprite itself does not:
    /// anything past the right or bottom edge is clipped.
    /// Returns true if any pixel was turned off (a collision).
    pub(crate) fn draw_sprite(&mut self, x: u8, y: u8, rows: &[u8]) -> bool {
        let x_pos = x as usize % DISPLAY_X;
        let y_pos = y as usize % DISPLAY_Y;

        // Don't draw out of bounds
        let row_count = std::cmp::min(rows.len(), DISPLAY_Y - y_pos);
        let col_count = std::cmp::min(8, DISPLAY_X - x_pos);

        let mut any_erased = false;
        for (row, sprite_byte) in rows.iter().take(row_count).enumerate() {
            for col in 0..col_count {
                // If current sprite bit is non-zero
                if (sprite_byte & (0x80 >> col)) != 0 {
                    let pixel = &mut self.pixels[y_pos + row][x_pos + col];

                    // Flip the pixel
                    *pixel ^= true;

                    if !*pixel {
                        any_erased = true;
                    }
                }
            }
        }

        self.changed = true;
        any_erased
    }

    pub fn pixels(&self) -> &Display<bool> {
        &self.pixels
    }

    pub fn pixel(&self, y: usize, x: usize) -> bool {
        self.pixels[y][x]
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Returns the changed flag and lowers it.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}
