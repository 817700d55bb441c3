//! Signed 16.16 fixed point, and the narrower formats the device registers use.

use core::fmt;

/// Signed fixed-point number with 16 integer and 16 fractional bits.
///
/// Every limit-check threshold, observed value and rate exchanged with the
/// driver uses this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixPoint1616(i32);

impl FixPoint1616 {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Builds a value from its raw 16.16 bit pattern.
    #[must_use]
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Raw 16.16 bit pattern.
    #[must_use]
    pub const fn to_bits(self) -> i32 {
        self.0
    }

    /// Builds a value from an integer part.
    #[must_use]
    pub const fn from_int(value: i16) -> Self {
        Self((value as i32) << 16)
    }

    /// Integer part, truncated toward negative infinity.
    #[must_use]
    pub const fn to_int(self) -> i32 {
        self.0 >> 16
    }

    /// `true` for exactly zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Converts from an unsigned 9.7 register value (rates in Mcps).
    #[must_use]
    pub const fn from_9_7(raw: u16) -> Self {
        Self((raw as i32) << 9)
    }

    /// Converts to an unsigned 9.7 register value, saturating at both ends.
    #[must_use]
    pub const fn to_9_7(self) -> u16 {
        saturate_u16(self.0 >> 9)
    }

    /// Converts from an unsigned 14.2 register value (sigma in mm).
    #[must_use]
    pub const fn from_14_2(raw: u16) -> Self {
        Self((raw as i32) << 14)
    }

    /// Converts to an unsigned 14.2 register value, saturating at both ends.
    #[must_use]
    pub const fn to_14_2(self) -> u16 {
        saturate_u16(self.0 >> 14)
    }

    /// Converts from an unsigned 8.8 register value (effective SPAD count).
    #[must_use]
    pub const fn from_8_8(raw: u16) -> Self {
        Self((raw as i32) << 8)
    }
}

const fn saturate_u16(value: i32) -> u16 {
    if value < 0 {
        0
    } else if value > u16::MAX as i32 {
        u16::MAX
    } else {
        value as u16
    }
}

impl From<i16> for FixPoint1616 {
    fn from(value: i16) -> Self {
        Self::from_int(value)
    }
}

impl fmt::Display for FixPoint1616 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        // Four decimals is finer than the coarsest register format (14.2).
        let fraction = (u64::from(magnitude & 0xFFFF) * 10_000) >> 16;
        write!(f, "{sign}{}.{fraction:04}", magnitude >> 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::string::ToString;

    #[test]
    fn register_formats_round_trip_on_representable_values() {
        // 90 mm in 14.2 is 0x0168, the sigma threshold of the default configuration.
        let sigma = FixPoint1616::from_14_2(0x0168);
        assert_eq!(sigma, FixPoint1616::from_int(90));
        assert_eq!(sigma.to_14_2(), 0x0168);

        // 0.25 Mcps in 9.7 is 0x0020.
        let rate = FixPoint1616::from_bits(0x4000);
        assert_eq!(rate.to_9_7(), 0x0020);
        assert_eq!(FixPoint1616::from_9_7(0x0020), rate);
    }

    #[test]
    fn narrowing_saturates() {
        assert_eq!(FixPoint1616::from_int(-3).to_9_7(), 0);
        assert_eq!(FixPoint1616::from_int(i16::MAX).to_9_7(), u16::MAX);
    }

    #[test]
    fn display_is_decimal() {
        assert_eq!(FixPoint1616::from_bits(0x0001_8000).to_string(), "1.5000");
        assert_eq!(FixPoint1616::from_int(-2).to_string(), "-2.0000");
    }
}
