//! Datagram header encoding and decoding.
//!
//! Implements the 12-byte header prefixed to every datagram:
//! ```text
//! ┌─────────────────┬──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ Flags │ Length  │ Session  │ Ack ID   │ Reserved │ Reserved │ Packet ID│
//! │ 5 bits│ 11 bits │ 2 bytes  │ 2 bytes  │ 2 bytes  │ 2 bytes  │ 2 bytes  │
//! └─────────────────┴──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. `Length` counts the whole
//! datagram, header included.

use crate::error::{AtemError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Largest datagram the 11-bit length field can describe.
pub const MAX_DATAGRAM_SIZE: usize = 0x07FF;

/// Largest payload that fits behind a header.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Flag constants for the protocol (the 5-bit set in the top of byte 0).
pub mod flags {
    /// Sender wants this datagram acknowledged.
    pub const ACK_REQUEST: u8 = 0b0000_0001;
    /// Handshake datagram.
    pub const HELLO: u8 = 0b0000_0010;
    /// Retransmission of an earlier datagram.
    pub const RESEND: u8 = 0b0000_0100;
    /// Set by some firmware, meaning unknown.
    pub const UNDEFINED: u8 = 0b0000_1000;
    /// Acknowledgement of `ack_id`.
    pub const ACK: u8 = 0b0001_0000;

    /// All defined flag bits.
    pub const MASK: u8 = 0b0001_1111;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Flag bits (see `flags` module).
    pub flags: u8,
    /// Total datagram length, header included.
    pub length: u16,
    /// Session identifier chosen by the device.
    pub session_id: u16,
    /// Packet ID being acknowledged.
    pub ack_id: u16,
    /// Sequence number; zero on Hello and Ack datagrams.
    pub packet_id: u16,
}

impl Header {
    /// Create a header for a datagram carrying `payload_size` bytes after the header.
    ///
    /// `payload_size` must not exceed [`MAX_PAYLOAD_SIZE`]; use
    /// [`encode_header`] when the size is not known to fit.
    pub fn new(
        flag_bits: u8,
        payload_size: usize,
        session_id: u16,
        ack_id: u16,
        packet_id: u16,
    ) -> Self {
        debug_assert!(
            payload_size <= MAX_PAYLOAD_SIZE,
            "payload of {} bytes does not fit an 11-bit length",
            payload_size
        );
        Self {
            flags: flag_bits & flags::MASK,
            length: (HEADER_SIZE + payload_size) as u16,
            session_id,
            ack_id,
            packet_id,
        }
    }

    /// Payload size implied by `length`.
    #[inline]
    pub fn payload_size(&self) -> usize {
        usize::from(self.length).saturating_sub(HEADER_SIZE)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use atem_client::protocol::{flags, Header};
    ///
    /// let header = Header::new(flags::ACK_REQUEST, 8, 0x8001, 0, 5);
    /// let bytes = header.encode();
    /// assert_eq!(bytes[0] >> 3, flags::ACK_REQUEST);
    /// assert_eq!(bytes[1], 20);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(usize::from(self.length) <= MAX_DATAGRAM_SIZE);
        let length = self.length & MAX_DATAGRAM_SIZE as u16;
        buf[0] = ((self.flags & flags::MASK) << 3) | (length >> 8) as u8;
        buf[1] = (length & 0xFF) as u8;
        buf[2..4].copy_from_slice(&self.session_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.ack_id.to_be_bytes());
        buf[6..10].fill(0);
        buf[10..12].copy_from_slice(&self.packet_id.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Fails with `TruncatedHeader` on fewer than 12 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(AtemError::TruncatedHeader { len: buf.len() });
        }
        Ok(Self {
            flags: buf[0] >> 3,
            length: u16::from_be_bytes([buf[0] & 0x07, buf[1]]),
            session_id: u16::from_be_bytes([buf[2], buf[3]]),
            ack_id: u16::from_be_bytes([buf[4], buf[5]]),
            packet_id: u16::from_be_bytes([buf[10], buf[11]]),
        })
    }

    #[inline]
    pub fn is_hello(&self) -> bool {
        flags::has_flag(self.flags, flags::HELLO)
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK)
    }

    #[inline]
    pub fn wants_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK_REQUEST)
    }

    #[inline]
    pub fn is_resend(&self) -> bool {
        flags::has_flag(self.flags, flags::RESEND)
    }
}

/// Encode a header from its fields (standalone function).
///
/// `packet_id` is forced to zero for Hello and Ack datagrams. Fails with
/// `InvalidValue` when the datagram would not fit the 11-bit length.
pub fn encode_header(
    flag_bits: u8,
    payload_size: usize,
    session_id: u16,
    ack_id: u16,
    packet_id: u16,
) -> Result<[u8; HEADER_SIZE]> {
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(AtemError::InvalidValue(format!(
            "payload of {} bytes exceeds {}",
            payload_size, MAX_PAYLOAD_SIZE
        )));
    }
    let packet_id = if flags::has_flag(flag_bits, flags::HELLO | flags::ACK) {
        0
    } else {
        packet_id
    };
    Ok(Header::new(flag_bits, payload_size, session_id, ack_id, packet_id).encode())
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(flags::ACK_REQUEST | flags::RESEND, 1000, 0x8123, 77, 4242);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_roundtrip_all_flags_and_boundary_lengths() {
        let lengths = [0, 1, 2, 255, 256, 1024, MAX_PAYLOAD_SIZE - 1, MAX_PAYLOAD_SIZE];
        let ids = [0u16, 1, 0x00FF, 0x0100, 0x7FFF, 0x8000, u16::MAX];

        for flag_bits in 0..=flags::MASK {
            for &len in &lengths {
                for &id in &ids {
                    let header = Header::new(flag_bits, len, id, id.rotate_left(3), !id);
                    let decoded = Header::decode(&header.encode()).unwrap();
                    assert_eq!(decoded, header, "flags {:#07b} len {}", flag_bits, len);
                    assert_eq!(decoded.payload_size(), len);
                }
            }
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        for len in [MAX_PAYLOAD_SIZE + 1, 3000, usize::from(u16::MAX)] {
            assert!(matches!(
                encode_header(flags::ACK_REQUEST, len, 1, 0, 1),
                Err(AtemError::InvalidValue(_))
            ));
        }
        let bytes = encode_header(flags::ACK_REQUEST, MAX_PAYLOAD_SIZE, 1, 0, 1).unwrap();
        assert_eq!(
            usize::from(decode_header(&bytes).unwrap().length),
            MAX_DATAGRAM_SIZE
        );
    }

    #[test]
    fn test_flag_and_length_packing() {
        // Length 0x5A3 straddles the flag byte.
        let header = Header::new(flags::HELLO, 0x5A3 - HEADER_SIZE, 0, 0, 0);
        let bytes = header.encode();

        assert_eq!(bytes[0], (flags::HELLO << 3) | 0x05);
        assert_eq!(bytes[1], 0xA3);
    }

    #[test]
    fn test_big_endian_byte_order() {
        let bytes = Header::new(0, 0, 0x0102, 0x0304, 0x0506).encode();

        assert_eq!(&bytes[2..4], &[0x01, 0x02]);
        assert_eq!(&bytes[4..6], &[0x03, 0x04]);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 0]);
        assert_eq!(&bytes[10..12], &[0x05, 0x06]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 11];
        match Header::decode(&buf) {
            Err(AtemError::TruncatedHeader { len }) => assert_eq!(len, 11),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(decode_header(&[]).is_err());
    }

    #[test]
    fn test_standalone_encode_zeroes_packet_id_on_hello_and_ack() {
        let hello = encode_header(flags::HELLO, 8, 0x1337, 0, 99).unwrap();
        let hello = decode_header(&hello).unwrap();
        assert_eq!(hello.packet_id, 0);
        assert_eq!(hello.length, 20);

        let ack = encode_header(flags::ACK, 0, 0x1337, 12, 99).unwrap();
        let ack = decode_header(&ack).unwrap();
        assert_eq!(ack.packet_id, 0);
        assert_eq!(ack.ack_id, 12);

        let cmd = encode_header(flags::ACK_REQUEST, 4, 0x1337, 0, 99).unwrap();
        let cmd = decode_header(&cmd).unwrap();
        assert_eq!(cmd.packet_id, 99);
    }

    #[test]
    fn test_header_accessors() {
        let header = Header::new(flags::HELLO | flags::ACK_REQUEST, 0, 0, 0, 0);
        assert!(header.is_hello());
        assert!(header.wants_ack());
        assert!(!header.is_ack());
        assert!(!header.is_resend());
        assert_eq!(header.payload_size(), 0);
    }
}
