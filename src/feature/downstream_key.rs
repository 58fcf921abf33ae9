//! Downstream keyers.
//!
//! `DskB` carries sources, `DskP` the keying properties and mask, `DskS`
//! the on-air and transition state. General properties (`CDsG`) and the
//! mask (`CDsM`) are group commands, so each setter touches one bit.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{
    apply, command, mask_bits, mask_command, raw_of, EventStream, FeatureLink, InstanceEvent,
    KeyMask, MaskEdge, Mirror, Notifier,
};
use crate::client::Client;
use crate::codec::{Field, GroupCommand, Width};
use crate::error::Result;
use crate::handler::{CommandDispatcher, RecordHandler};
use crate::protocol::Tag;
use crate::writer::CommandSink;

mod tags {
    use crate::protocol::Tag;

    pub const SOURCES: Tag = Tag::new(*b"DskB");
    pub const PROPERTIES: Tag = Tag::new(*b"DskP");
    pub const STATE: Tag = Tag::new(*b"DskS");

    pub const SET_FILL: Tag = Tag::new(*b"CDsF");
    pub const SET_KEY: Tag = Tag::new(*b"CDsC");
    pub const SET_ON_AIR: Tag = Tag::new(*b"CDsL");
    pub const AUTO: Tag = Tag::new(*b"DDsA");
    pub const SET_TIE: Tag = Tag::new(*b"CDsT");
    pub const SET_RATE: Tag = Tag::new(*b"CDsR");
    pub const SET_GENERAL: Tag = Tag::new(*b"CDsG");
    pub const SET_MASK: Tag = Tag::new(*b"CDsM");

    pub const STATUS: &[Tag] = &[SOURCES, PROPERTIES, STATE];
}

mod layout {
    use crate::codec::fixed_point::{PERCENT_TENTHS, PERMILLE};
    use crate::codec::Field;
    use crate::feature::MaskFields;

    pub const KEYER: Field = Field::u8(0);

    pub mod sources {
        use super::Field;
        pub const FILL: Field = Field::u16(2);
        pub const KEY: Field = Field::u16(4);
    }

    pub mod properties {
        use super::*;
        pub const TIE: Field = Field::u8(1);
        pub const RATE: Field = Field::u8(2);
        pub const PRE_MULTIPLIED: Field = Field::u8(3);
        pub const CLIP: Field = Field::u16(4).scaled(PERCENT_TENTHS);
        pub const GAIN: Field = Field::u16(6).scaled(PERCENT_TENTHS);
        pub const INVERT: Field = Field::u8(8);
        pub const MASK: MaskFields = MaskFields {
            enabled: Field::u8(9),
            top: Field::i16(10).scaled(PERMILLE),
            bottom: Field::i16(12).scaled(PERMILLE),
            left: Field::i16(14).scaled(PERMILLE),
            right: Field::i16(16).scaled(PERMILLE),
        };
    }

    pub mod state {
        use super::Field;
        pub const ON_AIR: Field = Field::u8(1);
        pub const IN_TRANSITION: Field = Field::u8(2);
        pub const AUTO_TRANSITIONING: Field = Field::u8(3);
        pub const FRAMES_REMAINING: Field = Field::u8(4);
    }

    /// `CDsF`, `CDsC`.
    pub mod set_source {
        use super::Field;
        pub const SOURCE: Field = Field::u16(2);
        pub const LEN: usize = 4;
    }

    /// `CDsL`, `CDsT`, `CDsR`, `DDsA`.
    pub mod single {
        use super::Field;
        pub const VALUE: Field = Field::u8(1);
        pub const LEN: usize = 4;
    }

    /// `CDsG`, a group command.
    pub mod set_general {
        use super::*;
        pub const PRE_MULTIPLIED_BIT: u32 = 0x01;
        pub const CLIP_BIT: u32 = 0x02;
        pub const GAIN_BIT: u32 = 0x04;
        pub const INVERT_BIT: u32 = 0x08;
        pub const KEYER: Field = Field::u8(1);
        pub const PRE_MULTIPLIED: Field = Field::u8(2);
        pub const CLIP: Field = Field::u16(4).scaled(PERCENT_TENTHS);
        pub const GAIN: Field = Field::u16(6).scaled(PERCENT_TENTHS);
        pub const INVERT: Field = Field::u8(8);
        pub const LEN: usize = 12;
    }

    /// `CDsM`, a group command.
    pub mod set_mask {
        use super::*;
        pub const KEYER: Field = Field::u8(1);
        pub const MASK: MaskFields = MaskFields {
            enabled: Field::u8(2),
            top: Field::i16(4).scaled(PERMILLE),
            bottom: Field::i16(6).scaled(PERMILLE),
            left: Field::i16(8).scaled(PERMILLE),
            right: Field::i16(10).scaled(PERMILLE),
        };
        pub const LEN: usize = 12;
    }
}

/// Mirrored state of one downstream keyer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownstreamKeyState {
    pub fill_source: u16,
    pub key_source: u16,
    pub tie: bool,
    /// Auto transition duration in frames.
    pub rate: u8,
    pub pre_multiplied: bool,
    /// Percent.
    pub clip: f64,
    /// Percent.
    pub gain: f64,
    pub invert: bool,
    pub mask: KeyMask,
    pub on_air: bool,
    pub in_transition: bool,
    pub auto_transitioning: bool,
    pub frames_remaining: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownstreamKeyEvent {
    Sources { keyer: u8, fill: u16, key: u16 },
    Tie { keyer: u8, tie: bool },
    Rate { keyer: u8, rate: u8 },
    General {
        keyer: u8,
        pre_multiplied: bool,
        clip: f64,
        gain: f64,
        invert: bool,
    },
    Mask { keyer: u8, mask: KeyMask },
    OnAir { keyer: u8, on_air: bool },
    Transition {
        keyer: u8,
        in_transition: bool,
        auto_transitioning: bool,
        frames_remaining: u8,
    },
}

impl InstanceEvent for DownstreamKeyEvent {
    type Instance = u8;

    fn instance(&self) -> u8 {
        match *self {
            Self::Sources { keyer, .. }
            | Self::Tie { keyer, .. }
            | Self::Rate { keyer, .. }
            | Self::General { keyer, .. }
            | Self::Mask { keyer, .. }
            | Self::OnAir { keyer, .. }
            | Self::Transition { keyer, .. } => keyer,
        }
    }
}

/// Mirror of all downstream keyers.
pub struct DownstreamKey {
    link: FeatureLink,
    mirror: Mirror<u8, DownstreamKeyState>,
    notifier: Notifier<DownstreamKeyEvent>,
}

impl DownstreamKey {
    pub fn attach(client: &Client) -> Arc<Self> {
        Self::attach_to(client.dispatcher(), client.command_sink(), client.event_capacity())
    }

    pub fn attach_to(
        dispatcher: &CommandDispatcher,
        sink: Arc<dyn CommandSink>,
        event_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|module: &Weak<Self>| Self {
            link: FeatureLink::new(dispatcher, sink, tags::STATUS, module),
            mirror: Mirror::new(),
            notifier: Notifier::new(event_capacity),
        })
    }

    pub fn subscribe(&self) -> EventStream<DownstreamKeyEvent> {
        self.notifier.subscribe()
    }

    pub fn state(&self, keyer: u8) -> Option<DownstreamKeyState> {
        self.mirror.get(keyer)
    }

    pub fn keyers(&self) -> BTreeMap<u8, DownstreamKeyState> {
        self.mirror.snapshot()
    }

    pub fn on_air(&self, keyer: u8) -> Option<bool> {
        self.mirror.read(keyer, |s| s.on_air)
    }

    pub fn mask(&self, keyer: u8) -> Option<KeyMask> {
        self.mirror.read(keyer, |s| s.mask)
    }

    pub fn set_fill_source(&self, keyer: u8, source: u16) -> Result<bool> {
        self.link
            .send_if_changed(self.mirror.read(keyer, |s| s.fill_source), source, || {
                Self::source_command(tags::SET_FILL, keyer, source)
            })
    }

    pub fn set_key_source(&self, keyer: u8, source: u16) -> Result<bool> {
        self.link
            .send_if_changed(self.mirror.read(keyer, |s| s.key_source), source, || {
                Self::source_command(tags::SET_KEY, keyer, source)
            })
    }

    pub fn set_on_air(&self, keyer: u8, on_air: bool) -> Result<bool> {
        self.link.send_if_changed(self.on_air(keyer), on_air, || {
            Self::single(tags::SET_ON_AIR, keyer, i64::from(on_air))
        })
    }

    /// Run the keyer's auto transition.
    pub fn auto(&self, keyer: u8) -> Result<()> {
        self.link.send(command(
            tags::AUTO,
            layout::single::LEN,
            &[(layout::KEYER, i64::from(keyer))],
        )?)
    }

    pub fn set_tie(&self, keyer: u8, tie: bool) -> Result<bool> {
        self.link
            .send_if_changed(self.mirror.read(keyer, |s| s.tie), tie, || {
                Self::single(tags::SET_TIE, keyer, i64::from(tie))
            })
    }

    pub fn set_rate(&self, keyer: u8, rate: u8) -> Result<bool> {
        self.link
            .send_if_changed(self.mirror.read(keyer, |s| s.rate), rate, || {
                Self::single(tags::SET_RATE, keyer, i64::from(rate))
            })
    }

    pub fn set_pre_multiplied(&self, keyer: u8, enabled: bool) -> Result<bool> {
        use layout::set_general as l;
        let cached = self.mirror.read(keyer, |s| i64::from(s.pre_multiplied));
        self.general(keyer, cached, l::PRE_MULTIPLIED_BIT, l::PRE_MULTIPLIED, i64::from(enabled))
    }

    /// Clip level in percent.
    pub fn set_clip(&self, keyer: u8, clip: f64) -> Result<bool> {
        use layout::set_general as l;
        let cached = raw_of(l::CLIP, self.mirror.read(keyer, |s| s.clip));
        self.general(keyer, cached, l::CLIP_BIT, l::CLIP, l::CLIP.encode(clip)?)
    }

    /// Gain in percent.
    pub fn set_gain(&self, keyer: u8, gain: f64) -> Result<bool> {
        use layout::set_general as l;
        let cached = raw_of(l::GAIN, self.mirror.read(keyer, |s| s.gain));
        self.general(keyer, cached, l::GAIN_BIT, l::GAIN, l::GAIN.encode(gain)?)
    }

    pub fn set_invert(&self, keyer: u8, invert: bool) -> Result<bool> {
        use layout::set_general as l;
        let cached = self.mirror.read(keyer, |s| i64::from(s.invert));
        self.general(keyer, cached, l::INVERT_BIT, l::INVERT, i64::from(invert))
    }

    pub fn set_masked(&self, keyer: u8, enabled: bool) -> Result<bool> {
        use layout::set_mask as l;
        let cached = self.mirror.read(keyer, |s| i64::from(s.mask.enabled));
        self.mask_field(keyer, cached, mask_bits::ENABLED, l::MASK.enabled, i64::from(enabled))
    }

    /// Move one mask edge; only that edge's bit is set in the command.
    pub fn set_mask_edge(&self, keyer: u8, edge: MaskEdge, value: f64) -> Result<bool> {
        use layout::set_mask as l;
        let field = l::MASK.edge(edge);
        let cached = raw_of(field, self.mirror.read(keyer, |s| s.mask.edge(edge)));
        self.mask_field(keyer, cached, mask_bits::edge(edge), field, field.encode(value)?)
    }

    fn general(
        &self,
        keyer: u8,
        cached: Option<i64>,
        bit: u32,
        field: Field,
        raw: i64,
    ) -> Result<bool> {
        use layout::set_general as l;
        self.link.send_if_changed(cached, raw, || {
            Ok(GroupCommand::new(tags::SET_GENERAL, Width::U8, l::LEN)
                .with(l::KEYER, f64::from(keyer))?
                .set_raw(bit, field, raw)?
                .finish())
        })
    }

    fn mask_field(
        &self,
        keyer: u8,
        cached: Option<i64>,
        bit: u32,
        field: Field,
        raw: i64,
    ) -> Result<bool> {
        use layout::set_mask as l;
        self.link.send_if_changed(cached, raw, || {
            Ok(mask_command(tags::SET_MASK, l::LEN, &[(l::KEYER, i64::from(keyer))])?
                .set_raw(bit, field, raw)?
                .finish())
        })
    }

    fn source_command(tag: Tag, keyer: u8, source: u16) -> Result<(Tag, Bytes)> {
        command(
            tag,
            layout::set_source::LEN,
            &[
                (layout::KEYER, i64::from(keyer)),
                (layout::set_source::SOURCE, i64::from(source)),
            ],
        )
    }

    fn single(tag: Tag, keyer: u8, value: i64) -> Result<(Tag, Bytes)> {
        command(
            tag,
            layout::single::LEN,
            &[(layout::KEYER, i64::from(keyer)), (layout::single::VALUE, value)],
        )
    }

    fn decode(&self, tag: Tag, body: &[u8]) -> Result<()> {
        let keyer = layout::KEYER.read_u8(body)?;
        let mut events = Vec::new();

        match tag {
            tags::SOURCES => {
                let fill = layout::sources::FILL.read_u16(body)?;
                let key = layout::sources::KEY.read_u16(body)?;
                let changed = self.mirror.update(keyer, |s| {
                    apply(&mut s.fill_source, fill) | apply(&mut s.key_source, key)
                });
                if changed {
                    events.push(DownstreamKeyEvent::Sources { keyer, fill, key });
                }
            }
            tags::PROPERTIES => {
                use layout::properties as l;
                let tie = l::TIE.read_bool(body)?;
                let rate = l::RATE.read_u8(body)?;
                let pre_multiplied = l::PRE_MULTIPLIED.read_bool(body)?;
                let clip = l::CLIP.read(body)?;
                let gain = l::GAIN.read(body)?;
                let invert = l::INVERT.read_bool(body)?;
                let mask = l::MASK.decode(body)?;

                self.mirror.update(keyer, |s| {
                    if apply(&mut s.tie, tie) {
                        events.push(DownstreamKeyEvent::Tie { keyer, tie });
                    }
                    if apply(&mut s.rate, rate) {
                        events.push(DownstreamKeyEvent::Rate { keyer, rate });
                    }
                    let general = apply(&mut s.pre_multiplied, pre_multiplied)
                        | apply(&mut s.clip, clip)
                        | apply(&mut s.gain, gain)
                        | apply(&mut s.invert, invert);
                    if general {
                        events.push(DownstreamKeyEvent::General {
                            keyer,
                            pre_multiplied,
                            clip,
                            gain,
                            invert,
                        });
                    }
                    if apply(&mut s.mask, mask) {
                        events.push(DownstreamKeyEvent::Mask { keyer, mask });
                    }
                });
            }
            tags::STATE => {
                use layout::state as l;
                let on_air = l::ON_AIR.read_bool(body)?;
                let in_transition = l::IN_TRANSITION.read_bool(body)?;
                let auto_transitioning = l::AUTO_TRANSITIONING.read_bool(body)?;
                let frames_remaining = l::FRAMES_REMAINING.read_u8(body)?;

                self.mirror.update(keyer, |s| {
                    if apply(&mut s.on_air, on_air) {
                        events.push(DownstreamKeyEvent::OnAir { keyer, on_air });
                    }
                    let transition = apply(&mut s.in_transition, in_transition)
                        | apply(&mut s.auto_transitioning, auto_transitioning)
                        | apply(&mut s.frames_remaining, frames_remaining);
                    if transition {
                        events.push(DownstreamKeyEvent::Transition {
                            keyer,
                            in_transition,
                            auto_transitioning,
                            frames_remaining,
                        });
                    }
                });
            }
            _ => {}
        }

        for event in events {
            self.notifier.emit(event);
        }
        Ok(())
    }
}

impl RecordHandler for DownstreamKey {
    fn handle_record(&self, tag: Tag, body: &Bytes) -> Result<()> {
        self.decode(tag, body)
    }
}
