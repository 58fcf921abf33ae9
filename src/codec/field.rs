//! Data-driven field codec.
//!
//! A [`Field`] describes one fixed-offset value inside a record body: where
//! it sits, how wide it is, whether it is signed and how it scales. Feature
//! modules declare one table of fields per tag and use the same read/write
//! code for all of them.
//!
//! ```
//! use atem_client::codec::Field;
//! use atem_client::codec::fixed_point::PERCENT_TENTHS;
//!
//! const CLIP: Field = Field::u16(4).scaled(PERCENT_TENTHS);
//!
//! let body = [0, 0, 0, 0, 0x03, 0xE8];
//! assert_eq!(CLIP.read(&body).unwrap(), 100.0);
//!
//! let mut out = [0u8; 6];
//! CLIP.write(&mut out, 42.5).unwrap();
//! assert_eq!(&out[4..], &425u16.to_be_bytes());
//! ```

use super::fixed_point::{from_fixed, to_fixed};
use crate::error::{AtemError, Result};

/// Integer width and signedness of a field. Always Big Endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    I16,
    U32,
    I32,
}

impl Width {
    /// Bytes occupied on the wire.
    pub const fn size(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 | Width::I16 => 2,
            Width::U32 | Width::I32 => 4,
        }
    }

    /// Inclusive raw range.
    pub const fn range(self) -> (i64, i64) {
        match self {
            Width::U8 => (0, u8::MAX as i64),
            Width::U16 => (0, u16::MAX as i64),
            Width::I16 => (i16::MIN as i64, i16::MAX as i64),
            Width::U32 => (0, u32::MAX as i64),
            Width::I32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// How a raw integer maps to an API value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// Used as-is.
    Raw,
    /// Raw value is the API value times this divisor.
    Fixed(f64),
}

/// One field of a record body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub offset: usize,
    pub width: Width,
    pub scale: Scale,
}

impl Field {
    pub const fn new(offset: usize, width: Width) -> Self {
        Self {
            offset,
            width,
            scale: Scale::Raw,
        }
    }

    pub const fn u8(offset: usize) -> Self {
        Self::new(offset, Width::U8)
    }

    pub const fn u16(offset: usize) -> Self {
        Self::new(offset, Width::U16)
    }

    pub const fn i16(offset: usize) -> Self {
        Self::new(offset, Width::I16)
    }

    pub const fn u32(offset: usize) -> Self {
        Self::new(offset, Width::U32)
    }

    pub const fn i32(offset: usize) -> Self {
        Self::new(offset, Width::I32)
    }

    /// Same field with a fixed-point divisor.
    pub const fn scaled(self, divisor: f64) -> Self {
        Self {
            scale: Scale::Fixed(divisor),
            ..self
        }
    }

    /// First byte past the field.
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.width.size()
    }

    fn bytes<'a>(&self, body: &'a [u8]) -> Result<&'a [u8]> {
        body.get(self.offset..self.end()).ok_or_else(|| {
            AtemError::MalformedRecord(format!(
                "body of {} bytes too short for field at {}..{}",
                body.len(),
                self.offset,
                self.end()
            ))
        })
    }

    /// Read the raw integer.
    pub fn read_raw(&self, body: &[u8]) -> Result<i64> {
        let b = self.bytes(body)?;
        Ok(match self.width {
            Width::U8 => i64::from(b[0]),
            Width::U16 => i64::from(u16::from_be_bytes([b[0], b[1]])),
            Width::I16 => i64::from(i16::from_be_bytes([b[0], b[1]])),
            Width::U32 => i64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            Width::I32 => i64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        })
    }

    /// Read and apply the scale.
    pub fn read(&self, body: &[u8]) -> Result<f64> {
        let raw = self.read_raw(body)?;
        Ok(match self.scale {
            Scale::Raw => raw as f64,
            Scale::Fixed(divisor) => from_fixed(raw, divisor),
        })
    }

    /// A full byte, non-zero meaning true.
    pub fn read_bool(&self, body: &[u8]) -> Result<bool> {
        Ok(self.read_raw(body)? != 0)
    }

    pub fn read_u8(&self, body: &[u8]) -> Result<u8> {
        Ok(self.read_raw(body)? as u8)
    }

    pub fn read_u16(&self, body: &[u8]) -> Result<u16> {
        Ok(self.read_raw(body)? as u16)
    }

    /// Write a raw integer, rejecting values outside the field's range.
    pub fn write_raw(&self, buf: &mut [u8], raw: i64) -> Result<()> {
        let (min, max) = self.width.range();
        if raw < min || raw > max {
            return Err(AtemError::InvalidValue(format!(
                "{} does not fit a {:?} field",
                raw, self.width
            )));
        }
        let end = self.end();
        let len = buf.len();
        let dst = buf.get_mut(self.offset..end).ok_or_else(|| {
            AtemError::InvalidValue(format!(
                "buffer of {} bytes too short for field at {}..{}",
                len, self.offset, end
            ))
        })?;
        match self.width {
            Width::U8 => dst[0] = raw as u8,
            Width::U16 => dst.copy_from_slice(&(raw as u16).to_be_bytes()),
            Width::I16 => dst.copy_from_slice(&(raw as i16).to_be_bytes()),
            Width::U32 => dst.copy_from_slice(&(raw as u32).to_be_bytes()),
            Width::I32 => dst.copy_from_slice(&(raw as i32).to_be_bytes()),
        }
        Ok(())
    }

    /// Scale and write a value.
    pub fn write(&self, buf: &mut [u8], value: f64) -> Result<()> {
        self.write_raw(buf, self.encode(value)?)
    }

    pub fn write_bool(&self, buf: &mut [u8], value: bool) -> Result<()> {
        self.write_raw(buf, i64::from(value))
    }

    /// Raw integer this field would carry for `value`.
    pub fn encode(&self, value: f64) -> Result<i64> {
        if !value.is_finite() {
            return Err(AtemError::InvalidValue(format!("{} is not finite", value)));
        }
        Ok(match self.scale {
            Scale::Raw => value.round() as i64,
            Scale::Fixed(divisor) => to_fixed(value, divisor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixed_point::{PERCENT_TENTHS, PERMILLE};

    #[test]
    fn test_read_each_width() {
        let body = [0xFF, 0x80, 0x00, 0xFF, 0xFF, 0xFF, 0xFE];
        assert_eq!(Field::u8(0).read_raw(&body).unwrap(), 255);
        assert_eq!(Field::u16(1).read_raw(&body).unwrap(), 0x8000);
        assert_eq!(Field::i16(1).read_raw(&body).unwrap(), -32768);
        assert_eq!(Field::u32(3).read_raw(&body).unwrap(), 0xFFFF_FFFE);
        assert_eq!(Field::i32(3).read_raw(&body).unwrap(), -2);
    }

    #[test]
    fn test_scaled_read_write() {
        let clip = Field::u16(0).scaled(PERCENT_TENTHS);
        assert_eq!(clip.read(&[0x03, 0xE8]).unwrap(), 100.0);

        let mut buf = [0u8; 2];
        clip.write(&mut buf, 42.5).unwrap();
        assert_eq!(u16::from_be_bytes(buf), 425);

        let edge = Field::i16(0).scaled(PERMILLE);
        edge.write(&mut buf, -9.0).unwrap();
        assert_eq!(i16::from_be_bytes(buf), -9000);
        assert_eq!(edge.read(&buf).unwrap(), -9.0);
    }

    #[test]
    fn test_short_body_is_malformed() {
        let err = Field::u16(4).read_raw(&[0, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, AtemError::MalformedRecord(_)));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut buf = [0u8; 4];
        assert!(Field::u8(0).write_raw(&mut buf, 256).is_err());
        assert!(Field::u16(0).write_raw(&mut buf, -1).is_err());
        assert!(Field::i16(0).write(&mut buf, 40_000.0).is_err());
        assert!(Field::u16(0).write(&mut buf, f64::NAN).is_err());
        assert!(Field::u16(3).write_raw(&mut buf, 1).is_err());
    }

    #[test]
    fn test_bool_occupies_full_byte() {
        let mut buf = [0u8; 2];
        Field::u8(1).write_bool(&mut buf, true).unwrap();
        assert_eq!(buf, [0, 1]);
        assert!(Field::u8(1).read_bool(&[0, 7]).unwrap());
        assert!(!Field::u8(1).read_bool(&[1, 0]).unwrap());
    }
}
