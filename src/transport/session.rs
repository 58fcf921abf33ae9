//! Session state machine: handshake, packet counter and acknowledgements.
//!
//! The session owns no socket. It turns received datagrams into replies to
//! send and records to dispatch, and turns outbound commands into
//! datagrams. The async client drives it from one task.
//!
//! ```text
//! Disconnected ──connect()──► AwaitingHello ──empty datagram──► Ready
//!      ▲                                                          │
//!      └────────────────────────disconnect()──────────────────────┘
//! ```
//!
//! Delivery is best-effort: unacknowledged commands are never resent.
//!
//! # Example
//!
//! ```
//! use atem_client::transport::{Session, SessionState};
//!
//! let mut session = Session::new();
//! let hello = session.connect();
//! assert_eq!(hello.len(), 20);
//! assert_eq!(session.state(), SessionState::AwaitingHello);
//! ```

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{AtemError, Result};
use crate::protocol::{
    build_datagram, encode_record_into, flags, Datagram, Header, Record, Tag, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};

/// Session ID used until the device assigns one.
pub const BOOTSTRAP_SESSION_ID: u16 = 0x1337;

/// Body of the Hello datagram.
pub const HELLO_PAYLOAD: [u8; 8] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No handshake in progress; nothing is sent or read.
    Disconnected,
    /// Hello sent, device state burst not finished yet.
    AwaitingHello,
    /// Device reported "session ready"; commands may be sent.
    Ready,
}

/// Outcome of feeding one datagram to the session.
#[derive(Debug, Clone, Default)]
pub struct Inbound {
    /// Datagrams to send back, in order.
    pub replies: Vec<Vec<u8>>,
    /// Records to hand to the dispatcher, in arrival order.
    pub records: Vec<Record>,
    /// True exactly once per session: the datagram that made it Ready.
    pub connected: bool,
}

/// Handshake and sequencing state for one logical connection.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    /// Last packet ID used; the next command uses this plus one.
    packet_counter: u16,
    session_id: u16,
}

impl Session {
    /// Create a disconnected session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            packet_counter: 0,
            session_id: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    #[inline]
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    #[inline]
    pub fn packet_counter(&self) -> u16 {
        self.packet_counter
    }

    /// Reset counters and build the Hello datagram.
    pub fn connect(&mut self) -> Vec<u8> {
        self.packet_counter = 0;
        self.session_id = BOOTSTRAP_SESSION_ID;
        self.state = SessionState::AwaitingHello;
        tracing::debug!("Sending hello with session {:#06x}", self.session_id);

        let header = Header::new(flags::HELLO, HELLO_PAYLOAD.len(), self.session_id, 0, 0);
        build_datagram(&header, &HELLO_PAYLOAD)
    }

    /// Local-only teardown; no goodbye is sent.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            tracing::debug!("Session {:#06x} disconnected", self.session_id);
        }
        self.state = SessionState::Disconnected;
    }

    /// Process one received datagram.
    ///
    /// Framing errors reject the whole datagram before any state changes,
    /// so a malformed datagram is neither acknowledged nor dispatched.
    pub fn receive(&mut self, bytes: Bytes) -> Result<Inbound> {
        if self.state == SessionState::Disconnected {
            tracing::debug!("Ignoring datagram while disconnected");
            return Ok(Inbound::default());
        }

        let datagram = Datagram::parse(bytes)?;
        let header = datagram.header;

        // Hello carries a fixed body, not records.
        let records = if header.is_hello() {
            Vec::new()
        } else {
            datagram.records()?
        };

        self.session_id = header.session_id;
        let mut inbound = Inbound::default();

        if header.is_hello() {
            tracing::debug!("Hello reply, session {:#06x}", header.session_id);
            inbound.replies.push(self.ack(header.packet_id));
        }

        if self.state != SessionState::Ready
            && !header.is_ack()
            && !header.is_hello()
            && datagram.is_empty()
        {
            self.state = SessionState::Ready;
            inbound.connected = true;
            tracing::debug!("Session {:#06x} ready", self.session_id);
        }

        if self.state == SessionState::Ready && header.wants_ack() {
            inbound.replies.push(self.ack(header.packet_id));
        }

        inbound.records = records;
        Ok(inbound)
    }

    /// Build a command datagram carrying one record.
    pub fn build_command(&mut self, tag: Tag, body: &[u8]) -> Result<Vec<u8>> {
        if self.state != SessionState::Ready {
            return Err(AtemError::NotConnected);
        }

        let mut payload = BytesMut::new();
        encode_record_into(&mut payload, tag, body)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(AtemError::InvalidValue(format!(
                "command {} of {} bytes exceeds datagram limit",
                tag,
                HEADER_SIZE + payload.len()
            )));
        }

        self.packet_counter = self.packet_counter.wrapping_add(1);
        let header = Header::new(
            flags::ACK_REQUEST,
            payload.len(),
            self.session_id,
            0,
            self.packet_counter,
        );
        tracing::trace!("Command {} as packet {}", tag, self.packet_counter);
        Ok(build_datagram(&header, &payload))
    }

    fn ack(&self, packet_id: u16) -> Vec<u8> {
        let header = Header::new(flags::ACK, 0, self.session_id, packet_id, 0);
        build_datagram(&header, &[])
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_record;

    const DEVICE_SESSION: u16 = 0x8042;

    fn device_datagram(flag_bits: u8, packet_id: u16, payload: &[u8]) -> Bytes {
        let header = Header::new(flag_bits, payload.len(), DEVICE_SESSION, 0, packet_id);
        Bytes::from(build_datagram(&header, payload))
    }

    fn parse(bytes: &[u8]) -> Header {
        Header::decode(bytes).unwrap()
    }

    #[test]
    fn test_connect_builds_hello() {
        let mut session = Session::new();
        let hello = session.connect();
        let header = parse(&hello);

        assert_eq!(header.flags, flags::HELLO);
        assert_eq!(header.length, 20);
        assert_eq!(header.session_id, BOOTSTRAP_SESSION_ID);
        assert_eq!(header.packet_id, 0);
        assert_eq!(&hello[HEADER_SIZE..], &HELLO_PAYLOAD);
        assert_eq!(session.packet_counter(), 0);
    }

    #[test]
    fn test_handshake_scenario() {
        let mut session = Session::new();
        session.connect();

        // Device answers with an Ack-flagged datagram: not yet ready.
        let reply = session
            .receive(device_datagram(flags::ACK, 0, &[]))
            .unwrap();
        assert!(!reply.connected);
        assert_eq!(session.state(), SessionState::AwaitingHello);

        // Zero-record datagram signals session ready.
        let ready = session
            .receive(device_datagram(flags::ACK_REQUEST, 5, &[]))
            .unwrap();
        assert!(ready.connected);
        assert!(session.is_ready());

        // Later empty datagrams don't reconnect.
        let again = session
            .receive(device_datagram(flags::ACK_REQUEST, 6, &[]))
            .unwrap();
        assert!(!again.connected);

        let connected_count = [reply, ready, again].iter().filter(|i| i.connected).count();
        assert_eq!(connected_count, 1);
    }

    #[test]
    fn test_hello_is_acked_and_session_adopted() {
        let mut session = Session::new();
        session.connect();

        let inbound = session
            .receive(device_datagram(flags::HELLO, 0, &[0x02, 0, 0, 0, 0, 0, 0, 0]))
            .unwrap();

        assert_eq!(session.session_id(), DEVICE_SESSION);
        assert_eq!(session.state(), SessionState::AwaitingHello);
        assert!(inbound.records.is_empty());
        assert_eq!(inbound.replies.len(), 1);

        let ack = parse(&inbound.replies[0]);
        assert_eq!(ack.flags, flags::ACK);
        assert_eq!(ack.session_id, DEVICE_SESSION);
        assert_eq!(ack.length as usize, HEADER_SIZE);
    }

    #[test]
    fn test_ack_request_acked_only_once_ready() {
        let mut session = Session::new();
        session.connect();

        let record = encode_record(Tag::new(*b"PrgI"), &[0, 0, 0, 1]).unwrap();
        let burst = session
            .receive(device_datagram(flags::ACK_REQUEST, 3, &record))
            .unwrap();
        assert!(burst.replies.is_empty());
        assert_eq!(burst.records.len(), 1);

        session
            .receive(device_datagram(flags::ACK_REQUEST, 4, &[]))
            .unwrap();

        let live = session
            .receive(device_datagram(flags::ACK_REQUEST, 9, &record))
            .unwrap();
        assert_eq!(live.replies.len(), 1);
        assert_eq!(parse(&live.replies[0]).ack_id, 9);
        assert_eq!(live.records.len(), 1);
    }

    #[test]
    fn test_ready_datagram_with_ack_request_is_acked() {
        let mut session = Session::new();
        session.connect();

        let ready = session
            .receive(device_datagram(flags::ACK_REQUEST, 12, &[]))
            .unwrap();
        assert!(ready.connected);
        assert_eq!(ready.replies.len(), 1);
        assert_eq!(parse(&ready.replies[0]).ack_id, 12);
    }

    #[test]
    fn test_records_returned_in_order() {
        let mut session = Session::new();
        session.connect();

        let mut payload = BytesMut::new();
        encode_record_into(&mut payload, Tag::new(*b"PrgI"), &[0, 0, 0, 1]).unwrap();
        encode_record_into(&mut payload, Tag::new(*b"PrvI"), &[0, 0, 0, 2]).unwrap();

        let inbound = session.receive(device_datagram(0, 1, &payload)).unwrap();
        let tags: Vec<Tag> = inbound.records.iter().map(|r| r.tag).collect();
        assert_eq!(tags, vec![Tag::new(*b"PrgI"), Tag::new(*b"PrvI")]);
    }

    #[test]
    fn test_malformed_datagram_changes_nothing() {
        let mut session = Session::new();
        session.connect();

        // Record claims more bytes than present.
        let payload = [0x00, 0x40, 0, 0, b'P', b'r', b'g', b'I'];
        let result = session.receive(device_datagram(flags::ACK_REQUEST, 1, &payload));

        assert!(matches!(result, Err(AtemError::MalformedRecord(_))));
        assert_eq!(session.session_id(), BOOTSTRAP_SESSION_ID);
        assert_eq!(session.state(), SessionState::AwaitingHello);

        assert!(session.receive(Bytes::from_static(&[1, 2, 3])).is_err());
    }

    #[test]
    fn test_build_command_requires_ready() {
        let mut session = Session::new();
        assert!(matches!(
            session.build_command(Tag::new(*b"DCut"), &[0; 4]),
            Err(AtemError::NotConnected)
        ));
        session.connect();
        assert!(session.build_command(Tag::new(*b"DCut"), &[0; 4]).is_err());
    }

    #[test]
    fn test_build_command_increments_packet_id() {
        let mut session = Session::new();
        session.connect();
        session.receive(device_datagram(0, 1, &[])).unwrap();

        let first = session.build_command(Tag::new(*b"DCut"), &[0; 4]).unwrap();
        let second = session.build_command(Tag::new(*b"DAut"), &[0; 4]).unwrap();

        let h1 = parse(&first);
        let h2 = parse(&second);
        assert_eq!(h1.flags, flags::ACK_REQUEST);
        assert_eq!(h1.session_id, DEVICE_SESSION);
        assert_eq!(h1.packet_id, 1);
        assert_eq!(h2.packet_id, 2);
        assert_eq!(h1.length as usize, first.len());
        assert_eq!(&first[HEADER_SIZE + 4..HEADER_SIZE + 8], b"DCut");
    }

    #[test]
    fn test_oversized_command_rejected() {
        let mut session = Session::new();
        session.connect();
        session.receive(device_datagram(0, 1, &[])).unwrap();

        let body = vec![0u8; MAX_PAYLOAD_SIZE];
        assert!(session.build_command(Tag::new(*b"Big!"), &body).is_err());
        assert_eq!(session.packet_counter(), 0);
    }

    #[test]
    fn test_disconnect_is_local() {
        let mut session = Session::new();
        session.connect();
        session.receive(device_datagram(0, 1, &[])).unwrap();
        session.disconnect();

        assert_eq!(session.state(), SessionState::Disconnected);
        let ignored = session.receive(device_datagram(flags::ACK_REQUEST, 2, &[])).unwrap();
        assert!(ignored.replies.is_empty());
        assert!(!ignored.connected);
    }

    #[test]
    fn test_reconnect_resets_counter() {
        let mut session = Session::new();
        session.connect();
        session.receive(device_datagram(0, 1, &[])).unwrap();
        session.build_command(Tag::new(*b"DCut"), &[0; 4]).unwrap();
        assert_eq!(session.packet_counter(), 1);

        session.connect();
        assert_eq!(session.packet_counter(), 0);
        assert_eq!(session.session_id(), BOOTSTRAP_SESSION_ID);
    }
}
