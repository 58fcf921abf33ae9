//! Datagram struct: one header plus its payload.
//!
//! Uses `bytes::Bytes` so records sliced from the payload share the
//! receive buffer.
//!
//! # Example
//!
//! ```
//! use atem_client::protocol::{build_datagram, flags, Datagram, Header};
//!
//! let header = Header::new(flags::ACK_REQUEST, 0, 0x8001, 0, 1);
//! let bytes = build_datagram(&header, &[]);
//! let datagram = Datagram::parse(bytes.into()).unwrap();
//!
//! assert_eq!(datagram.header.packet_id, 1);
//! assert!(datagram.is_empty());
//! ```

use bytes::Bytes;

use super::record::{decode_records, Record};
use super::wire_format::{Header, HEADER_SIZE, MAX_DATAGRAM_SIZE};
use crate::error::{AtemError, Result};

/// A complete datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Decoded header.
    pub header: Header,
    /// Bytes after the header.
    pub payload: Bytes,
}

impl Datagram {
    /// Parse a received datagram.
    ///
    /// The header's `length` must equal the number of bytes received.
    pub fn parse(bytes: Bytes) -> Result<Self> {
        let header = Header::decode(&bytes)?;
        let length = usize::from(header.length);

        if length < HEADER_SIZE {
            return Err(AtemError::MalformedDatagram(format!(
                "declared length {} is shorter than the header",
                length
            )));
        }
        if length != bytes.len() {
            return Err(AtemError::MalformedDatagram(format!(
                "declared length {} but received {} bytes",
                length,
                bytes.len()
            )));
        }

        Ok(Self {
            header,
            payload: bytes.slice(HEADER_SIZE..),
        })
    }

    /// True when nothing follows the header.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Split the payload into records.
    pub fn records(&self) -> Result<Vec<Record>> {
        decode_records(&self.payload)
    }
}

/// Build a complete datagram as a single byte vector.
///
/// The header's `length` is recomputed from `payload`.
pub fn build_datagram(header: &Header, payload: &[u8]) -> Vec<u8> {
    debug_assert!(HEADER_SIZE + payload.len() <= MAX_DATAGRAM_SIZE);
    let header = Header::new(
        header.flags,
        payload.len(),
        header.session_id,
        header.ack_id,
        header.packet_id,
    );
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_record, flags, Tag};

    #[test]
    fn test_parse_with_records() {
        let record = encode_record(Tag::new(*b"PrgI"), &[0, 0, 0, 1]).unwrap();
        let header = Header::new(flags::ACK_REQUEST, record.len(), 0x8001, 0, 3);
        let bytes = build_datagram(&header, &record);

        let datagram = Datagram::parse(Bytes::from(bytes)).unwrap();
        assert_eq!(datagram.header.session_id, 0x8001);
        assert_eq!(datagram.payload.len(), 12);

        let records = datagram.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, Tag::new(*b"PrgI"));
    }

    #[test]
    fn test_build_recomputes_length() {
        let header = Header::new(flags::ACK_REQUEST, 999, 1, 0, 1);
        let bytes = build_datagram(&header, &[1, 2, 3]);
        assert_eq!(Header::decode(&bytes).unwrap().length, 15);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let header = Header::new(0, 4, 1, 0, 0);
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[0, 0]); // two bytes short

        assert!(matches!(
            Datagram::parse(Bytes::from(bytes)),
            Err(AtemError::MalformedDatagram(_))
        ));
    }

    #[test]
    fn test_declared_length_below_header_rejected() {
        let mut bytes = Header::new(0, 0, 1, 0, 0).encode();
        bytes[1] = 4;
        assert!(Datagram::parse(Bytes::copy_from_slice(&bytes)).is_err());
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(matches!(
            Datagram::parse(Bytes::from_static(&[0x08, 0x0c, 0, 0])),
            Err(AtemError::TruncatedHeader { len: 4 })
        ));
    }
}
