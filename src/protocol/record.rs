//! Tagged payload records.
//!
//! Every datagram payload is a sequence of self-length-prefixed records:
//! ```text
//! ┌──────────┬──────────┬──────────────┬─────────────────────┐
//! │ Length   │ Reserved │ Tag          │ Body                │
//! │ uint16 BE│ 2 bytes  │ 4 ASCII bytes│ Length - 8 bytes    │
//! └──────────┴──────────┴──────────────┴─────────────────────┘
//! ```
//!
//! `Length` covers the whole record, its own two bytes included.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AtemError, Result};

/// Bytes in front of a record body (length, reserved, tag).
pub const RECORD_HEADER_SIZE: usize = 8;

/// Largest body a single record can carry.
pub const MAX_RECORD_BODY: usize = u16::MAX as usize - RECORD_HEADER_SIZE;

/// Four-character ASCII identifier naming a command or status record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag([u8; 4]);

impl Tag {
    /// Create a tag from four raw bytes.
    ///
    /// ```
    /// use atem_client::protocol::Tag;
    ///
    /// const PROGRAM_INPUT: Tag = Tag::new(*b"PrgI");
    /// assert_eq!(PROGRAM_INPUT.to_string(), "PrgI");
    /// ```
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Raw tag bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = AtemError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(AtemError::InvalidTag(s.to_string()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag(\"{}\")", self)
    }
}

/// One decoded record: a tag and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record tag.
    pub tag: Tag,
    /// Tag-specific fields (zero-copy slice of the datagram).
    pub body: Bytes,
}

impl Record {
    pub fn new(tag: Tag, body: Bytes) -> Self {
        Self { tag, body }
    }

    /// Size of this record on the wire.
    #[inline]
    pub fn wire_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.body.len()
    }
}

/// Append one encoded record to `buf`.
pub fn encode_record_into(buf: &mut BytesMut, tag: Tag, body: &[u8]) -> Result<()> {
    if body.len() > MAX_RECORD_BODY {
        return Err(AtemError::InvalidValue(format!(
            "record body of {} bytes exceeds {}",
            body.len(),
            MAX_RECORD_BODY
        )));
    }
    buf.reserve(RECORD_HEADER_SIZE + body.len());
    buf.put_u16((RECORD_HEADER_SIZE + body.len()) as u16);
    buf.put_u16(0);
    buf.put_slice(tag.as_bytes());
    buf.put_slice(body);
    Ok(())
}

/// Encode a single record.
///
/// # Example
///
/// ```
/// use atem_client::protocol::{decode_records, encode_record, Tag};
///
/// let bytes = encode_record(Tag::new(*b"DCut"), &[0, 0, 0, 0]).unwrap();
/// assert_eq!(bytes.len(), 12);
///
/// let records = decode_records(&bytes).unwrap();
/// assert_eq!(records[0].tag, Tag::new(*b"DCut"));
/// ```
pub fn encode_record(tag: Tag, body: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + body.len());
    encode_record_into(&mut buf, tag, body)?;
    Ok(buf.freeze())
}

/// Split a payload into its records.
///
/// Fails with `MalformedRecord` when a declared length is shorter than the
/// record header or runs past the end of the buffer; nothing is read out
/// of bounds.
pub fn decode_records(payload: &Bytes) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let remaining = payload.len() - offset;
        if remaining < 2 {
            return Err(AtemError::MalformedRecord(format!(
                "{} trailing byte(s) at offset {}",
                remaining, offset
            )));
        }

        let length = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        if length < RECORD_HEADER_SIZE {
            return Err(AtemError::MalformedRecord(format!(
                "record length {} at offset {} is shorter than its header",
                length, offset
            )));
        }
        if length > remaining {
            return Err(AtemError::MalformedRecord(format!(
                "record length {} at offset {} exceeds remaining {} bytes",
                length, offset, remaining
            )));
        }

        let tag = Tag::new([
            payload[offset + 4],
            payload[offset + 5],
            payload[offset + 6],
            payload[offset + 7],
        ]);
        let body = payload.slice(offset + RECORD_HEADER_SIZE..offset + length);
        records.push(Record::new(tag, body));

        offset += length;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRGI: Tag = Tag::new(*b"PrgI");
    const PRVI: Tag = Tag::new(*b"PrvI");

    #[test]
    fn test_record_roundtrip() {
        let bytes = encode_record(PRGI, &[0, 0, 0x03, 0xE8]).unwrap();
        let records = decode_records(&bytes).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, PRGI);
        assert_eq!(&records[0].body[..], &[0, 0, 0x03, 0xE8]);
    }

    #[test]
    fn test_roundtrip_across_body_sizes() {
        let sizes = [0, 1, 2, 7, 8, 255, 256, 2035, 4096, MAX_RECORD_BODY - 1, MAX_RECORD_BODY];
        let tags = [PRGI, PRVI, Tag::new(*b"_ver"), Tag::new([0, 0xFF, b' ', b'~'])];

        for &size in &sizes {
            for &tag in &tags {
                let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
                let bytes = encode_record(tag, &body).unwrap();
                assert_eq!(bytes.len(), RECORD_HEADER_SIZE + size);

                let records = decode_records(&bytes).unwrap();
                assert_eq!(records, vec![Record::new(tag, Bytes::from(body))], "size {}", size);
            }
        }
    }

    #[test]
    fn test_concatenated_records_roundtrip() {
        let mut buf = BytesMut::new();
        let mut expected = Vec::new();
        for size in 0..40usize {
            let tag = if size % 2 == 0 { PRGI } else { PRVI };
            let body = vec![size as u8; size];
            encode_record_into(&mut buf, tag, &body).unwrap();
            expected.push(Record::new(tag, Bytes::from(body)));
        }
        assert_eq!(decode_records(&buf.freeze()).unwrap(), expected);
    }

    #[test]
    fn test_record_layout() {
        let bytes = encode_record(PRGI, &[7]).unwrap();
        assert_eq!(&bytes[..], &[0, 9, 0, 0, b'P', b'r', b'g', b'I', 7]);
    }

    #[test]
    fn test_empty_and_maximum_bodies() {
        let empty = encode_record(PRVI, &[]).unwrap();
        assert_eq!(decode_records(&empty).unwrap()[0].body.len(), 0);

        let big = vec![0xAB; MAX_RECORD_BODY];
        let bytes = encode_record(PRVI, &big).unwrap();
        let records = decode_records(&bytes).unwrap();
        assert_eq!(records[0].body.len(), MAX_RECORD_BODY);

        let too_big = vec![0u8; MAX_RECORD_BODY + 1];
        assert!(encode_record(PRVI, &too_big).is_err());
    }

    #[test]
    fn test_multiple_records_in_order() {
        let mut buf = BytesMut::new();
        encode_record_into(&mut buf, PRGI, &[0, 0, 0, 1]).unwrap();
        encode_record_into(&mut buf, PRVI, &[0, 0, 0, 2, 0, 0, 0, 0]).unwrap();
        let payload = buf.freeze();

        let records = decode_records(&payload).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tag, PRGI);
        assert_eq!(records[1].tag, PRVI);
        assert_eq!(records[1].wire_len(), 16);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = encode_record(PRGI, &[1, 2, 3, 4]).unwrap();
        let truncated = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            decode_records(&truncated),
            Err(AtemError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_declared_length_past_end_rejected() {
        // Claims 0x0200 bytes but only 8 are present.
        let payload = Bytes::from_static(&[0x02, 0x00, 0, 0, b'A', b'B', b'C', b'D']);
        assert!(decode_records(&payload).is_err());
    }

    #[test]
    fn test_zero_length_record_rejected() {
        let payload = Bytes::from_static(&[0, 0, 0, 0]);
        assert!(decode_records(&payload).is_err());
    }

    #[test]
    fn test_single_trailing_byte_rejected() {
        let mut buf = BytesMut::new();
        encode_record_into(&mut buf, PRGI, &[]).unwrap();
        buf.put_u8(0);
        assert!(decode_records(&buf.freeze()).is_err());
    }

    #[test]
    fn test_empty_payload_has_no_records() {
        assert!(decode_records(&Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_tag_parsing() {
        let tag: Tag = "PrgI".parse().unwrap();
        assert_eq!(tag, PRGI);
        assert!("Prg".parse::<Tag>().is_err());
        assert!("PrgIx".parse::<Tag>().is_err());
        assert!("Pr I".parse::<Tag>().is_err());
    }

    #[test]
    fn test_tag_display_escapes_non_ascii() {
        let tag = Tag::new([b'_', b'v', 0x00, b'r']);
        assert_eq!(tag.to_string(), "_v\\x00r");
        assert_eq!(format!("{:?}", PRGI), "Tag(\"PrgI\")");
    }
}
