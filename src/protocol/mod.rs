//! Protocol module - wire codec for datagrams and records.
//!
//! Pure functions, no I/O and no state:
//! - 12-byte datagram header encoding/decoding
//! - Tagged record encoding and bounds-checked splitting
//! - Datagram struct tying a header to its payload

mod datagram;
mod record;
mod wire_format;

pub use datagram::{build_datagram, Datagram};
pub use record::{
    decode_records, encode_record, encode_record_into, Record, Tag, MAX_RECORD_BODY,
    RECORD_HEADER_SIZE,
};
pub use wire_format::{
    decode_header, encode_header, flags, Header, HEADER_SIZE, MAX_DATAGRAM_SIZE,
    MAX_PAYLOAD_SIZE,
};
