//! Transport module - session state machine and UDP socket handling.
//!
//! - [`Session`] - handshake, packet IDs and acks, without I/O
//! - [`open_socket`] / [`resolve_address`] - UDP plumbing for the client

mod session;
mod udp;

pub use session::{Inbound, Session, SessionState, BOOTSTRAP_SESSION_ID, HELLO_PAYLOAD};
pub use udp::{open_socket, resolve_address, DEFAULT_PORT};
