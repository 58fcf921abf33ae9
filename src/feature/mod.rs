//! Feature modules - state mirrors of device subsystems.
//!
//! Every module follows the same discipline:
//! - **decode-on-receive**: status records update the cache, and one
//!   notification is emitted per field group whose value actually changed
//! - **compare-before-send**: setters send a command only when the request
//!   differs from the cache, and never touch the cache themselves; the new
//!   value shows up after the device broadcasts it back
//!
//! Modules:
//! - [`MixEffect`] - program/preview routing, transitions, fade to black
//! - [`DownstreamKey`] - downstream keyers
//! - [`UpstreamKey`] - upstream keyers (luma, mask, DVE)
//! - [`CameraControl`] - lens, camera and color-correction parameters
//! - [`ColorGenerator`] - color generators (HSL)
//! - [`DeviceInfo`] - protocol version, product name, raw topology

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::codec::{Field, GroupCommand};
use crate::error::Result;
use crate::handler::{CommandDispatcher, RecordHandler, Registration};
use crate::protocol::Tag;
use crate::writer::CommandSink;

mod camera_control;
mod color_generator;
mod device_info;
mod downstream_key;
mod mix_effect;
mod upstream_key;

pub use camera_control::{
    CameraControl, CameraEvent, CameraParameter, CameraState, CameraValue, ColorComponents,
};
pub use color_generator::{ColorGenerator, ColorGeneratorEvent, ColorGeneratorState};
pub use device_info::{DeviceInfo, DeviceInfoEvent, DeviceInfoState};
pub use downstream_key::{DownstreamKey, DownstreamKeyEvent, DownstreamKeyState};
pub use mix_effect::{
    FadeToBlackState, MixEffect, MixEffectEvent, MixEffectState, TransitionState,
    TransitionStyle,
};
pub use upstream_key::{
    DveParameter, DveTransform, KeyType, KeyerId, LumaParameters, UpstreamKey,
    UpstreamKeyEvent, UpstreamKeyState,
};

/// Notification that belongs to one subsystem instance.
pub trait InstanceEvent: Clone + Send + 'static {
    /// Instance key (mix-effect id, keyer id, camera input, ...).
    type Instance: Copy + PartialEq + Send + 'static;

    fn instance(&self) -> Self::Instance;
}

/// Receiver of a module's change notifications.
///
/// Notifications arrive in the order the datagrams carrying them were
/// received. A listener that falls behind skips what it missed.
pub struct EventStream<E: InstanceEvent> {
    rx: broadcast::Receiver<E>,
    instance: Option<E::Instance>,
}

impl<E: InstanceEvent> EventStream<E> {
    fn new(rx: broadcast::Receiver<E>) -> Self {
        Self { rx, instance: None }
    }

    /// Only yield notifications for one instance.
    pub fn for_instance(mut self, instance: E::Instance) -> Self {
        self.instance = Some(instance);
        self
    }

    fn wanted(&self, event: &E) -> bool {
        self.instance.map_or(true, |i| event.instance() == i)
    }

    /// Wait for the next notification; `None` once the module is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wanted(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event listener lagged, skipped {} notifications", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered notification, if any.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wanted(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("Event listener lagged, skipped {} notifications", n);
                }
                Err(_) => return None,
            }
        }
    }
}

/// Fan-out of change notifications.
pub(crate) struct Notifier<E> {
    tx: broadcast::Sender<E>,
}

impl<E: InstanceEvent> Notifier<E> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to current listeners; having none is fine.
    pub(crate) fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> EventStream<E> {
        EventStream::new(self.tx.subscribe())
    }
}

/// Cached state per instance. Written only by the owning module's decoders.
pub(crate) struct Mirror<K, S> {
    entries: RwLock<BTreeMap<K, S>>,
}

impl<K: Ord + Copy, S: Clone + Default> Mirror<K, S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn get(&self, key: K) -> Option<S> {
        self.read(key, S::clone)
    }

    pub(crate) fn read<R>(&self, key: K, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(f)
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<K, S> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate an entry, creating it on first sight.
    pub(crate) fn update<R>(&self, key: K, f: impl FnOnce(&mut S) -> R) -> R {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        f(entries.entry(key).or_default())
    }
}

/// Store `value` in `slot`; true when it differed.
pub(crate) fn apply<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Raw wire integer of a cached value, for exact comparisons.
pub(crate) fn raw_of(field: Field, cached: Option<f64>) -> Option<i64> {
    cached.and_then(|v| field.encode(v).ok())
}

/// Build a plain (non-group) command body from raw field values.
pub(crate) fn command(tag: Tag, len: usize, fields: &[(Field, i64)]) -> Result<(Tag, Bytes)> {
    let mut body = BytesMut::zeroed(len);
    for &(field, raw) in fields {
        field.write_raw(&mut body, raw)?;
    }
    Ok((tag, body.freeze()))
}

/// A module's connection to the engine: its outbound sink and its
/// subscriptions, which end when the module is dropped.
pub(crate) struct FeatureLink {
    sink: Arc<dyn CommandSink>,
    _registrations: Vec<Registration>,
}

impl FeatureLink {
    pub(crate) fn new<T: RecordHandler + 'static>(
        dispatcher: &CommandDispatcher,
        sink: Arc<dyn CommandSink>,
        tags: &[Tag],
        module: &Weak<T>,
    ) -> Self {
        let handler: Weak<dyn RecordHandler> = module.clone();
        Self {
            sink,
            _registrations: dispatcher.subscribe_all(tags, &handler),
        }
    }

    /// Send unconditionally (actions such as cut).
    pub(crate) fn send(&self, (tag, body): (Tag, Bytes)) -> Result<()> {
        self.sink.send_command(tag, body)
    }

    /// Send only when `requested` differs from `cached`.
    ///
    /// Unknown state (`None`) always sends. Returns whether a command went out.
    pub(crate) fn send_if_changed<T: PartialEq>(
        &self,
        cached: Option<T>,
        requested: T,
        build: impl FnOnce() -> Result<(Tag, Bytes)>,
    ) -> Result<bool> {
        if cached.as_ref() == Some(&requested) {
            return Ok(false);
        }
        let (tag, body) = build()?;
        tracing::trace!("Sending {}", tag);
        self.sink.send_command(tag, body)?;
        Ok(true)
    }
}

/// Edge of a key mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskEdge {
    Top,
    Bottom,
    Left,
    Right,
}

/// Rectangular key mask, edges in thousandths-precision units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMask {
    pub enabled: bool,
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl KeyMask {
    pub fn edge(&self, edge: MaskEdge) -> f64 {
        match edge {
            MaskEdge::Top => self.top,
            MaskEdge::Bottom => self.bottom,
            MaskEdge::Left => self.left,
            MaskEdge::Right => self.right,
        }
    }
}

/// Where mask fields sit in one record layout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MaskFields {
    pub enabled: Field,
    pub top: Field,
    pub bottom: Field,
    pub left: Field,
    pub right: Field,
}

impl MaskFields {
    pub(crate) fn decode(&self, body: &[u8]) -> Result<KeyMask> {
        Ok(KeyMask {
            enabled: self.enabled.read_bool(body)?,
            top: self.top.read(body)?,
            bottom: self.bottom.read(body)?,
            left: self.left.read(body)?,
            right: self.right.read(body)?,
        })
    }

    pub(crate) fn edge(&self, edge: MaskEdge) -> Field {
        match edge {
            MaskEdge::Top => self.top,
            MaskEdge::Bottom => self.bottom,
            MaskEdge::Left => self.left,
            MaskEdge::Right => self.right,
        }
    }
}

/// Mask group bits, shared by the downstream and upstream mask commands.
pub(crate) mod mask_bits {
    use super::MaskEdge;

    pub const ENABLED: u32 = 0x01;

    pub const fn edge(edge: MaskEdge) -> u32 {
        match edge {
            MaskEdge::Top => 0x02,
            MaskEdge::Bottom => 0x04,
            MaskEdge::Left => 0x08,
            MaskEdge::Right => 0x10,
        }
    }
}

/// Start a mask group command with its addressing fields written.
pub(crate) fn mask_command(
    tag: Tag,
    len: usize,
    addressing: &[(Field, i64)],
) -> Result<GroupCommand> {
    let mut cmd = GroupCommand::new(tag, crate::codec::Width::U8, len);
    for &(field, raw) in addressing {
        cmd = cmd.with(field, raw as f64)?;
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u8);

    impl InstanceEvent for Ping {
        type Instance = u8;

        fn instance(&self) -> u8 {
            self.0
        }
    }

    #[test]
    fn test_apply_reports_change() {
        let mut slot = 5u16;
        assert!(!apply(&mut slot, 5));
        assert!(apply(&mut slot, 6));
        assert_eq!(slot, 6);
    }

    #[test]
    fn test_mirror_update_creates_entry() {
        let mirror: Mirror<u8, u16> = Mirror::new();
        assert_eq!(mirror.get(1), None);

        mirror.update(1, |v| *v = 7);
        assert_eq!(mirror.get(1), Some(7));
        assert_eq!(mirror.snapshot().len(), 1);
    }

    #[test]
    fn test_event_stream_filters_instance() {
        let notifier = Notifier::new(8);
        let mut all = notifier.subscribe();
        let mut only_two = notifier.subscribe().for_instance(2);

        notifier.emit(Ping(1));
        notifier.emit(Ping(2));

        assert_eq!(all.try_recv(), Some(Ping(1)));
        assert_eq!(all.try_recv(), Some(Ping(2)));
        assert_eq!(only_two.try_recv(), Some(Ping(2)));
        assert_eq!(only_two.try_recv(), None);
    }

    #[test]
    fn test_lagged_listener_keeps_newest() {
        let notifier = Notifier::new(2);
        let mut stream = notifier.subscribe();
        for i in 0..5 {
            notifier.emit(Ping(i));
        }
        assert_eq!(stream.try_recv(), Some(Ping(3)));
        assert_eq!(stream.try_recv(), Some(Ping(4)));
    }

    #[tokio::test]
    async fn test_stream_ends_when_notifier_dropped() {
        let notifier: Notifier<Ping> = Notifier::new(2);
        let mut stream = notifier.subscribe();
        drop(notifier);
        assert_eq!(stream.recv().await, None);
    }

    #[test]
    fn test_command_builder() {
        let (tag, body) = command(
            Tag::new(*b"CPgI"),
            4,
            &[(Field::u8(0), 1), (Field::u16(2), 3010)],
        )
        .unwrap();
        assert_eq!(tag, Tag::new(*b"CPgI"));
        assert_eq!(&body[..], &[1, 0, 0x0B, 0xC2]);
    }

    #[test]
    fn test_raw_of_uses_field_scale() {
        let clip = Field::u16(0).scaled(10.0);
        assert_eq!(raw_of(clip, Some(42.5)), Some(425));
        assert_eq!(raw_of(clip, None), None);
    }
}
