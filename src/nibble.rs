use std::{
    fmt,
    ops::{Index, IndexMut},
};

/// A 4-bit unsigned integer (nibble).
///
/// Used for register selectors and key indices, so indexing a `[T; 16]`
/// with it can never go out of bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub struct u4(u8);

impl u4 {
    /// Creates a new `u4` from a `u8`.
    ///
    /// Panics if the value is greater than 0x0F.
    pub const fn new(value: u8) -> Self {
        assert!(value <= 0x0F, "u4 value must be in range 0x0-0xF");
        Self(value)
    }

    /// Creates a `u4` from the low nibble of `value`, discarding the high one.
    pub const fn from_low(value: u8) -> Self {
        Self(value & 0x0F)
    }
}

impl From<u4> for usize {
    fn from(v: u4) -> usize {
        v.0 as usize
    }
}

impl fmt::UpperHex for u4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl<T> Index<u4> for [T; 16] {
    type Output = T;

    fn index(&self, index: u4) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl<T> IndexMut<u4> for [T; 16] {
    fn index_mut(&mut self, index: u4) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_low_masks_high_nibble() {
        assert_eq!(u4::from_low(0xAB), u4::new(0xB));
        assert_eq!(usize::from(u4::from_low(0x1F)), 0xF);
    }

    #[test]
    #[should_panic]
    fn new_rejects_values_above_nibble() {
        let _ = u4::new(0x10);
    }

    #[test]
    fn indexes_sixteen_element_arrays() {
        let mut regs = [0u8; 16];
        regs[u4::new(0xC)] = 7;
        assert_eq!(regs[12], 7);
        assert_eq!(regs[u4::new(0xC)], 7);
    }
}
