//! Word, bit and scaling helpers shared by the codec and the register file
//!
//! Bit positions are counted from the least significant bit: position `n` is
//! `1 << n`. This is the order in which Modbus packs coils into a byte.

use crate::error::{ModbusError, ModbusResult};

/// Split a word into `(high, low)` bytes
#[inline]
pub fn split_u16(value: u16) -> (u8, u8) {
    let [high, low] = value.to_be_bytes();
    (high, low)
}

/// Join `(high, low)` bytes into a word
#[inline]
pub fn combine_u8(high: u8, low: u8) -> u16 {
    u16::from_be_bytes([high, low])
}

/// Extract `count` bits starting at `start`, right aligned.
///
/// ```rust
/// use voltage_ics::utils::bits_in_range_be;
///
/// assert_eq!(bits_in_range_be(0, 5, 0b0110_1011), 0b01011);
/// assert_eq!(bits_in_range_be(3, 2, 0b0110_1011), 0b01);
/// ```
#[inline]
pub fn bits_in_range_be(start: u16, count: u16, bits: u8) -> u8 {
    if start >= 8 || count == 0 {
        return 0;
    }
    let mask = if count >= 8 {
        0xFF
    } else {
        (1u8 << count) - 1
    };
    (bits >> start) & mask
}

/// Set the bit at `position` to `value`
pub fn set_bit_be(byte: &mut u8, position: u8, value: bool) -> ModbusResult<()> {
    if position >= 8 {
        return Err(ModbusError::out_of_bounds("digital port", position as usize, 8));
    }
    let mask = 1u8 << position;
    if value {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
    Ok(())
}

/// Read the bit at `position`
pub fn bit_be(byte: u8, position: u8) -> ModbusResult<bool> {
    if position >= 8 {
        return Err(ModbusError::out_of_bounds("digital port", position as usize, 8));
    }
    Ok(bits_in_range_be(position as u16, 1, byte) != 0)
}

/// Linearly map `value` from `[min, max]` onto `[0, 1]`.
///
/// Fails when `value` lies outside the range.
pub fn normalize_in_range(value: f64, min: f64, max: f64) -> ModbusResult<f64> {
    if !(min..=max).contains(&value) || min >= max {
        return Err(ModbusError::OutOfRange { value, min, max });
    }
    Ok((value - min) / (max - min))
}

/// Map a stored 16-bit word onto the engineering range `[min, max]`
#[inline]
pub fn denormalize_u16_in_range(value: u16, min: f64, max: f64) -> f64 {
    min + f64::from(value) * (max - min) / f64::from(u16::MAX)
}

/// Format bytes as space separated hex, for frame logs
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
