//! Utility functions for bit manipulation and register byte ordering.
//!
//! # Example
//!
//! ```
//! use plclink::utils::{get_bit, set_bit, swap_register};
//!
//! let value: u8 = 0b0010_0100;
//! assert!(get_bit(value, 2));
//! assert!(!get_bit(value, 3));
//! assert_eq!(set_bit(value, 0, true), 0b0010_0101);
//!
//! assert_eq!(swap_register([0x12, 0x34]), [0x34, 0x12]);
//! ```

/// Mask selecting bit `n` of a byte, indexed by `n`.
pub const BIT_MASK: [u8; 8] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];

/// Gets a single bit from a byte.
///
/// # Arguments
///
/// * `value` - The byte to extract from
/// * `bit` - Bit position (0-7, where 0 is LSB)
///
/// # Panics
///
/// Panics if `bit` is greater than 7.
#[inline]
pub fn get_bit(value: u8, bit: u8) -> bool {
    value & BIT_MASK[bit as usize] != 0
}

/// Sets or clears a single bit in a byte and returns the result.
///
/// # Panics
///
/// Panics if `bit` is greater than 7.
#[inline]
pub fn set_bit(value: u8, bit: u8, state: bool) -> u8 {
    if state {
        value | BIT_MASK[bit as usize]
    } else {
        value & !BIT_MASK[bit as usize]
    }
}

/// Reverses the two bytes of a 16-bit register.
///
/// ```
/// use plclink::utils::swap_register;
///
/// let reg = [0xAB, 0xCD];
/// assert_eq!(swap_register(swap_register(reg)), reg);
/// ```
#[inline]
pub fn swap_register(register: [u8; 2]) -> [u8; 2] {
    [register[1], register[0]]
}

/// Swaps the bytes of every complete 16-bit register in `bytes`, in place.
///
/// A trailing odd byte is left untouched.
pub fn swap_register_bytes(bytes: &mut [u8]) {
    for pair in bytes.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Formats bytes as space separated hex for frame traces.
///
/// # Example
///
/// ```
/// use plclink::utils::format_hex_bytes;
///
/// assert_eq!(format_hex_bytes(&[0x03, 0x00, 0x00, 0x16]), "03 00 00 16");
/// assert_eq!(format_hex_bytes(&[]), "");
/// ```
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
