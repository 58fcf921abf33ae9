//! Device identification sent during the initial state burst.
//!
//! `_top` (topology) is kept as raw bytes; nothing here interprets it.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{apply, EventStream, FeatureLink, InstanceEvent, Notifier};
use crate::client::Client;
use crate::codec::Field;
use crate::error::Result;
use crate::handler::{CommandDispatcher, RecordHandler};
use crate::protocol::Tag;
use crate::writer::CommandSink;

const VERSION: Tag = Tag::new(*b"_ver");
const PRODUCT: Tag = Tag::new(*b"_pin");
const TOPOLOGY: Tag = Tag::new(*b"_top");

const MAJOR: Field = Field::u16(0);
const MINOR: Field = Field::u16(2);
/// Product name field width; shorter names are NUL-padded.
const PRODUCT_NAME_LEN: usize = 44;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfoState {
    /// `(major, minor)` protocol version.
    pub protocol_version: Option<(u16, u16)>,
    pub product_name: Option<String>,
    /// Undecoded `_top` body.
    pub topology: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceInfoEvent {
    ProtocolVersion { major: u16, minor: u16 },
    ProductName(String),
    Topology(Vec<u8>),
}

impl InstanceEvent for DeviceInfoEvent {
    type Instance = ();

    fn instance(&self) -> Self::Instance {}
}

pub struct DeviceInfo {
    // Kept for its registrations; device info has no commands.
    _link: FeatureLink,
    state: RwLock<DeviceInfoState>,
    notifier: Notifier<DeviceInfoEvent>,
}

impl DeviceInfo {
    pub fn attach(client: &Client) -> Arc<Self> {
        Self::attach_to(client.dispatcher(), client.command_sink(), client.event_capacity())
    }

    pub fn attach_to(
        dispatcher: &CommandDispatcher,
        sink: Arc<dyn CommandSink>,
        event_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|module: &Weak<Self>| Self {
            _link: FeatureLink::new(dispatcher, sink, &[VERSION, PRODUCT, TOPOLOGY], module),
            state: RwLock::new(DeviceInfoState::default()),
            notifier: Notifier::new(event_capacity),
        })
    }

    pub fn subscribe(&self) -> EventStream<DeviceInfoEvent> {
        self.notifier.subscribe()
    }

    pub fn state(&self) -> DeviceInfoState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn protocol_version(&self) -> Option<(u16, u16)> {
        self.state().protocol_version
    }

    pub fn product_name(&self) -> Option<String> {
        self.state().product_name
    }

    fn decode(&self, tag: Tag, body: &[u8]) -> Result<()> {
        let (event, changed) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match tag {
                VERSION => {
                    let major = MAJOR.read_u16(body)?;
                    let minor = MINOR.read_u16(body)?;
                    let changed = apply(&mut state.protocol_version, Some((major, minor)));
                    (DeviceInfoEvent::ProtocolVersion { major, minor }, changed)
                }
                PRODUCT => {
                    let name = product_name(body);
                    let changed = apply(&mut state.product_name, Some(name.clone()));
                    (DeviceInfoEvent::ProductName(name), changed)
                }
                TOPOLOGY => {
                    let raw = body.to_vec();
                    let changed = apply(&mut state.topology, Some(raw.clone()));
                    (DeviceInfoEvent::Topology(raw), changed)
                }
                _ => return Ok(()),
            }
        };

        if changed {
            tracing::debug!("Device info: {:?}", event);
            self.notifier.emit(event);
        }
        Ok(())
    }
}

impl RecordHandler for DeviceInfo {
    fn handle_record(&self, tag: Tag, body: &Bytes) -> Result<()> {
        self.decode(tag, body)
    }
}

/// NUL-terminated, at most 44 bytes.
fn product_name(body: &[u8]) -> String {
    let field = &body[..body.len().min(PRODUCT_NAME_LEN)];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Record;
    use crate::writer::RecordingSink;

    fn setup() -> (CommandDispatcher, Arc<DeviceInfo>) {
        let dispatcher = CommandDispatcher::new();
        let module = DeviceInfo::attach_to(&dispatcher, Arc::new(RecordingSink::new()), 8);
        (dispatcher, module)
    }

    #[test]
    fn test_version_and_name() {
        let (dispatcher, info) = setup();
        let mut events = info.subscribe();

        dispatcher
            .dispatch(&Record::new(VERSION, Bytes::from_static(&[0, 2, 0, 30])))
            .unwrap();
        let mut name = b"ATEM Television Studio HD".to_vec();
        name.resize(44, 0);
        dispatcher
            .dispatch(&Record::new(PRODUCT, Bytes::from(name)))
            .unwrap();

        assert_eq!(info.protocol_version(), Some((2, 30)));
        assert_eq!(info.product_name().as_deref(), Some("ATEM Television Studio HD"));
        assert_eq!(
            events.try_recv(),
            Some(DeviceInfoEvent::ProtocolVersion { major: 2, minor: 30 })
        );
        assert!(matches!(events.try_recv(), Some(DeviceInfoEvent::ProductName(_))));
    }

    #[test]
    fn test_topology_kept_opaque() {
        let (dispatcher, info) = setup();
        dispatcher
            .dispatch(&Record::new(TOPOLOGY, Bytes::from_static(&[1, 2, 3, 4])))
            .unwrap();
        assert_eq!(info.state().topology, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_repeated_version_not_renotified() {
        let (dispatcher, info) = setup();
        let mut events = info.subscribe();
        let record = Record::new(VERSION, Bytes::from_static(&[0, 2, 0, 30]));
        dispatcher.dispatch(&record).unwrap();
        dispatcher.dispatch(&record).unwrap();
        assert!(events.try_recv().is_some());
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_product_name_without_terminator() {
        assert_eq!(product_name(b"Mini"), "Mini");
        assert_eq!(product_name(&[b'A'; 50]).len(), 44);
    }
}
