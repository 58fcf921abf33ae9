//! # atem-client
//!
//! Client engine for the ATEM broadcast switcher control protocol.
//!
//! The device streams its state to the client over UDP as tagged records;
//! the client mirrors that state and sends commands back.
//!
//! ## Architecture
//!
//! - **Protocol** (`protocol`): 12-byte datagram header, tagged records
//! - **Session** (`transport`): handshake, acks, packet IDs; no I/O
//! - **Dispatch** (`handler`): tag → subscribed record handlers
//! - **Feature modules** (`feature`): per-subsystem state mirrors that
//!   decode on receive and compare before send
//! - **Runtime** (`Client`): one task owning the socket and the session
//!
//! ## Example
//!
//! ```no_run
//! use atem_client::{Client, MixEffect, MixEffectEvent};
//!
//! #[tokio::main]
//! async fn main() -> atem_client::Result<()> {
//!     let mut client = Client::builder().bind("192.168.10.240").await?;
//!     let mix_effect = MixEffect::attach(&client);
//!     let mut events = mix_effect.subscribe().for_instance(0);
//!
//!     client.start()?;
//!     client.wait_connected().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let MixEffectEvent::ProgramInput { source, .. } = event {
//!             println!("program is now {}", source);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod feature;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, ConnectionEvent};
pub use config::ClientConfig;
pub use error::{AtemError, Result};
pub use feature::{
    CameraControl, CameraEvent, CameraParameter, ColorGenerator, ColorGeneratorEvent, DeviceInfo,
    DeviceInfoEvent, DownstreamKey, DownstreamKeyEvent, EventStream, KeyMask, MaskEdge,
    MixEffect, MixEffectEvent, UpstreamKey, UpstreamKeyEvent,
};
pub use protocol::Tag;
pub use transport::SessionState;
pub use writer::{CommandSink, CommandWriter, RecordingSink};
