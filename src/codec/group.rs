//! Group commands: one outbound record that updates any subset of a field group.
//!
//! The body starts with a bitmask (1, 2 or 4 bytes). Each set bit tells the
//! device to apply one of the packed fields; the others are sent as zero
//! placeholders and ignored.
//!
//! ```
//! use atem_client::codec::{Field, GroupCommand, Width};
//! use atem_client::protocol::Tag;
//!
//! const BOTTOM: Field = Field::i16(6).scaled(1000.0);
//!
//! let (tag, body) = GroupCommand::new(Tag::new(*b"CDsM"), Width::U8, 12)
//!     .with(Field::u8(1), 0.0).unwrap()
//!     .set(0x04, BOTTOM, -2.5).unwrap()
//!     .finish();
//!
//! assert_eq!(tag, Tag::new(*b"CDsM"));
//! assert_eq!(body[0], 0x04);
//! assert_eq!(&body[6..8], &(-2500i16).to_be_bytes());
//! ```

use bytes::Bytes;

use super::field::{Field, Width};
use crate::error::{AtemError, Result};
use crate::protocol::Tag;

/// Builder for a bitmask-prefixed command body.
#[derive(Debug, Clone)]
pub struct GroupCommand {
    tag: Tag,
    mask_field: Field,
    mask: u32,
    body: Vec<u8>,
}

impl GroupCommand {
    /// Start a command whose mask of `mask_width` sits at offset 0.
    pub fn new(tag: Tag, mask_width: Width, body_len: usize) -> Self {
        Self {
            tag,
            mask_field: Field::new(0, mask_width),
            mask: 0,
            body: vec![0; body_len.max(mask_width.size())],
        }
    }

    /// Set a field and mark it for application.
    pub fn set(mut self, bit: u32, field: Field, value: f64) -> Result<Self> {
        self.mark(bit)?;
        field.write(&mut self.body, value)?;
        Ok(self)
    }

    /// Set a raw integer field and mark it for application.
    pub fn set_raw(mut self, bit: u32, field: Field, raw: i64) -> Result<Self> {
        self.mark(bit)?;
        field.write_raw(&mut self.body, raw)?;
        Ok(self)
    }

    pub fn set_bool(self, bit: u32, field: Field, value: bool) -> Result<Self> {
        self.set_raw(bit, field, i64::from(value))
    }

    /// Write an addressing field (instance index) that is not masked.
    pub fn with(mut self, field: Field, value: f64) -> Result<Self> {
        field.write(&mut self.body, value)?;
        Ok(self)
    }

    /// Bits set so far.
    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Write the mask and hand back the record parts.
    pub fn finish(mut self) -> (Tag, Bytes) {
        // `mark` keeps the mask within its width and the body is at least
        // as long as the mask, so this write cannot fail.
        let written = self.mask_field.write_raw(&mut self.body, i64::from(self.mask));
        debug_assert!(written.is_ok(), "mask write failed: {:?}", written);
        (self.tag, Bytes::from(self.body))
    }

    fn mark(&mut self, bit: u32) -> Result<()> {
        let mask = self.mask | bit;
        let (_, max) = self.mask_field.width.range();
        if i64::from(mask) > max {
            return Err(AtemError::InvalidValue(format!(
                "mask bit {:#x} does not fit a {:?} mask",
                bit, self.mask_field.width
            )));
        }
        self.mask = mask;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: Tag = Tag::new(*b"CKMs");
    const TOP: Field = Field::i16(4).scaled(1000.0);
    const BOTTOM: Field = Field::i16(6).scaled(1000.0);
    const LEFT: Field = Field::i16(8).scaled(1000.0);
    const RIGHT: Field = Field::i16(10).scaled(1000.0);

    #[test]
    fn test_only_touched_bit_set() {
        let (_, body) = GroupCommand::new(TAG, Width::U8, 12)
            .set(0x04, BOTTOM, -3.0)
            .unwrap()
            .finish();

        assert_eq!(body[0], 0x04);
        // Placeholders stay zero.
        assert_eq!(&body[4..6], &[0, 0]);
        assert_eq!(&body[6..8], &(-3000i16).to_be_bytes());
        assert_eq!(&body[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_multiple_bits_accumulate() {
        let cmd = GroupCommand::new(TAG, Width::U8, 12)
            .set(0x02, TOP, 9.0)
            .unwrap()
            .set(0x08, LEFT, -16.0)
            .unwrap()
            .set(0x10, RIGHT, 16.0)
            .unwrap();
        assert_eq!(cmd.mask(), 0x1A);
        assert_eq!(cmd.finish().1[0], 0x1A);
    }

    #[test]
    fn test_wide_mask_is_big_endian() {
        let (_, body) = GroupCommand::new(TAG, Width::U32, 16)
            .set_raw(0x0100, Field::u8(8), 1)
            .unwrap()
            .finish();
        assert_eq!(&body[0..4], &[0, 0, 1, 0]);
    }

    #[test]
    fn test_bit_wider_than_mask_rejected() {
        let result = GroupCommand::new(TAG, Width::U8, 12).set(0x100, TOP, 1.0);
        assert!(matches!(result, Err(AtemError::InvalidValue(_))));

        let cmd = GroupCommand::new(TAG, Width::U16, 12)
            .set(0x100, TOP, 1.0)
            .unwrap();
        assert_eq!(&cmd.finish().1[0..2], &[0x01, 0x00]);
    }

    #[test]
    fn test_rejected_bit_leaves_mask_untouched() {
        let cmd = GroupCommand::new(TAG, Width::U8, 12)
            .set(0x02, TOP, 1.0)
            .unwrap();
        assert!(cmd.clone().set_raw(0x200, Field::u8(1), 1).is_err());
        assert_eq!(cmd.mask(), 0x02);
    }

    #[test]
    fn test_invalid_value_propagates() {
        let result = GroupCommand::new(TAG, Width::U8, 12).set(0x02, TOP, 100.0);
        assert!(result.is_err());
    }
}
