//! Fixed-point conversions used by feature fields.
//!
//! Device fields carry integers; the API exposes floats. Each field has a
//! divisor: percentages use 10, 100 or 1000 depending on resolution, hue
//! uses tenths of a degree wrapped at 3600, and color correction uses
//! signed 2048/4096/8192 families.
//!
//! ```
//! use atem_client::codec::fixed_point::{from_fixed, to_fixed, PERCENT_TENTHS};
//!
//! assert_eq!(from_fixed(1000, PERCENT_TENTHS), 100.0);
//! assert_eq!(to_fixed(42.5, PERCENT_TENTHS), 425);
//! ```

/// Percent in tenths (clip, gain).
pub const PERCENT_TENTHS: f64 = 10.0;

/// Percent in hundredths.
pub const PERCENT_HUNDREDTHS: f64 = 100.0;

/// Thousandths (mask edges, DVE size and position, saturation, luma).
pub const PERMILLE: f64 = 1000.0;

/// Transition position, 0..=10000.
pub const TRANSITION_POSITION: f64 = 10_000.0;

/// Hue in tenths of a degree.
pub const HUE_TENTHS: f64 = 10.0;

/// Color-correction lift.
pub const LIFT: f64 = 4096.0;

/// Color-correction gamma.
pub const GAMMA: f64 = 8192.0;

/// Color-correction gain and offset.
pub const GAIN: f64 = 2048.0;

/// Full circle in hue tenths.
const HUE_WRAP: i64 = 3600;

/// Scale a value into its raw integer, rounding to nearest.
#[inline]
pub fn to_fixed(value: f64, scale: f64) -> i64 {
    (value * scale).round() as i64
}

/// Raw integer back to a value.
#[inline]
pub fn from_fixed(raw: i64, scale: f64) -> f64 {
    raw as f64 / scale
}

/// Degrees to wire hue, wrapped into 0..3600.
pub fn hue_to_fixed(degrees: f64) -> u16 {
    to_fixed(degrees, HUE_TENTHS).rem_euclid(HUE_WRAP) as u16
}

/// Wire hue to degrees in 0.0..360.0.
pub fn hue_from_fixed(raw: u16) -> f64 {
    from_fixed(i64::from(raw).rem_euclid(HUE_WRAP), HUE_TENTHS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_example() {
        assert_eq!(from_fixed(1000, PERCENT_TENTHS), 100.0);
        assert_eq!(to_fixed(42.5, PERCENT_TENTHS), 425);
    }

    #[test]
    fn test_rounding_to_nearest() {
        assert_eq!(to_fixed(0.0004, PERMILLE), 0);
        assert_eq!(to_fixed(0.0006, PERMILLE), 1);
        assert_eq!(to_fixed(-1.5, PERMILLE), -1500);
    }

    #[test]
    fn test_hue_wraps() {
        assert_eq!(hue_to_fixed(0.0), 0);
        assert_eq!(hue_to_fixed(359.9), 3599);
        assert_eq!(hue_to_fixed(360.0), 0);
        assert_eq!(hue_to_fixed(370.5), 105);
        assert_eq!(hue_to_fixed(-10.0), 3500);
        assert_eq!(hue_from_fixed(3605), 0.5);
    }

    #[test]
    fn test_color_correction_families() {
        assert_eq!(to_fixed(-1.0, LIFT), -4096);
        assert_eq!(to_fixed(0.5, GAMMA), 4096);
        assert_eq!(to_fixed(16.0, GAIN), 32768);
        assert_eq!(from_fixed(-2048, GAIN), -1.0);
    }
}
