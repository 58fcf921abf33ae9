//! Upstream keyers, addressed by mix-effect bus and keyer index.
//!
//! Status: `KeBP` (type, sources, mask), `KeLm` (luma parameters) and
//! `KeDV` (DVE transform). Commands: `CKTp`, `CKeF`, `CKeC`, `CKMs`,
//! `CKLm` and `CKDV`. `CKDV` carries a 32-bit mask.

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

/// `(mix_effect, keyer)`.
pub type KeyerId = (u8, u8);

mod tags {
    use crate::protocol::Tag;

    pub const BASE: Tag = Tag::new(*b"KeBP");
    pub const LUMA: Tag = Tag::new(*b"KeLm");
    pub const DVE: Tag = Tag::new(*b"KeDV");

    pub const SET_TYPE: Tag = Tag::new(*b"CKTp");
    pub const SET_FILL: Tag = Tag::new(*b"CKeF");
    pub const SET_KEY: Tag = Tag::new(*b"CKeC");
    pub const SET_MASK: Tag = Tag::new(*b"CKMs");
    pub const SET_LUMA: Tag = Tag::new(*b"CKLm");
    pub const SET_DVE: Tag = Tag::new(*b"CKDV");

    pub const STATUS: &[Tag] = &[BASE, LUMA, DVE];
}

mod layout {
    use crate::codec::fixed_point::{PERCENT_TENTHS, PERMILLE};
    use crate::codec::Field;
    use crate::feature::MaskFields;

    /// Status records address the keyer at bytes 0 and 1.
    pub const ME: Field = Field::u8(0);
    pub const KEYER: Field = Field::u8(1);

    pub mod base {
        use super::*;
        pub const TYPE: Field = Field::u8(2);
        pub const FLY_ENABLED: Field = Field::u8(5);
        pub const FILL: Field = Field::u16(6);
        pub const KEY: Field = Field::u16(8);
        pub const MASK: MaskFields = MaskFields {
            enabled: Field::u8(10),
            top: Field::i16(12).scaled(PERMILLE),
            bottom: Field::i16(14).scaled(PERMILLE),
            left: Field::i16(16).scaled(PERMILLE),
            right: Field::i16(18).scaled(PERMILLE),
        };
    }

    pub mod luma {
        use super::*;
        pub const PRE_MULTIPLIED: Field = Field::u8(2);
        pub const CLIP: Field = Field::u16(4).scaled(PERCENT_TENTHS);
        pub const GAIN: Field = Field::u16(6).scaled(PERCENT_TENTHS);
        pub const INVERT: Field = Field::u8(8);
    }

    pub mod dve {
        use super::*;
        pub const SIZE_X: Field = Field::i32(4).scaled(PERMILLE);
        pub const SIZE_Y: Field = Field::i32(8).scaled(PERMILLE);
        pub const POSITION_X: Field = Field::i32(12).scaled(PERMILLE);
        pub const POSITION_Y: Field = Field::i32(16).scaled(PERMILLE);
        pub const ROTATION: Field = Field::i32(20).scaled(PERCENT_TENTHS);
    }

    /// `CKTp`, a group command.
    pub mod set_type {
        use super::Field;
        pub const TYPE_BIT: u32 = 0x01;
        pub const FLY_BIT: u32 = 0x02;
        pub const ME: Field = Field::u8(1);
        pub const KEYER: Field = Field::u8(2);
        pub const TYPE: Field = Field::u8(3);
        pub const FLY_ENABLED: Field = Field::u8(4);
        pub const LEN: usize = 8;
    }

    /// `CKeF`, `CKeC`.
    pub mod set_source {
        use super::Field;
        pub const SOURCE: Field = Field::u16(2);
        pub const LEN: usize = 4;
    }

    /// `CKMs`, a group command.
    pub mod set_mask {
        use super::*;
        pub const ME: Field = Field::u8(1);
        pub const KEYER: Field = Field::u8(2);
        pub const MASK: MaskFields = MaskFields {
            enabled: Field::u8(3),
            top: Field::i16(4).scaled(PERMILLE),
            bottom: Field::i16(6).scaled(PERMILLE),
            left: Field::i16(8).scaled(PERMILLE),
            right: Field::i16(10).scaled(PERMILLE),
        };
        pub const LEN: usize = 12;
    }

    /// `CKLm`, a group command.
    pub mod set_luma {
        use super::*;
        pub const PRE_MULTIPLIED_BIT: u32 = 0x01;
        pub const CLIP_BIT: u32 = 0x02;
        pub const GAIN_BIT: u32 = 0x04;
        pub const INVERT_BIT: u32 = 0x08;
        pub const ME: Field = Field::u8(1);
        pub const KEYER: Field = Field::u8(2);
        pub const PRE_MULTIPLIED: Field = Field::u8(3);
        pub const CLIP: Field = Field::u16(4).scaled(PERCENT_TENTHS);
        pub const GAIN: Field = Field::u16(6).scaled(PERCENT_TENTHS);
        pub const INVERT: Field = Field::u8(8);
        pub const LEN: usize = 12;
    }

    /// `CKDV`, a group command with a 32-bit mask.
    pub mod set_dve {
        use super::*;
        pub const ME: Field = Field::u8(4);
        pub const KEYER: Field = Field::u8(5);
        pub const SIZE_X: Field = Field::i32(8).scaled(PERMILLE);
        pub const SIZE_Y: Field = Field::i32(12).scaled(PERMILLE);
        pub const POSITION_X: Field = Field::i32(16).scaled(PERMILLE);
        pub const POSITION_Y: Field = Field::i32(20).scaled(PERMILLE);
        pub const ROTATION: Field = Field::i32(24).scaled(PERCENT_TENTHS);
        pub const LEN: usize = 28;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[default]
    Luma,
    Chroma,
    Pattern,
    Dve,
    Other(u8),
}

impl KeyType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Luma,
            1 => Self::Chroma,
            2 => Self::Pattern,
            3 => Self::Dve,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Self::Luma => 0,
            Self::Chroma => 1,
            Self::Pattern => 2,
            Self::Dve => 3,
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LumaParameters {
    pub pre_multiplied: bool,
    /// Percent.
    pub clip: f64,
    /// Percent.
    pub gain: f64,
    pub invert: bool,
}

/// DVE box geometry. Sizes are factors, positions are screen units,
/// rotation is degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DveTransform {
    pub size_x: f64,
    pub size_y: f64,
    pub position_x: f64,
    pub position_y: f64,
    pub rotation: f64,
}

/// One member of [`DveTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DveParameter {
    SizeX,
    SizeY,
    PositionX,
    PositionY,
    Rotation,
}

impl DveParameter {
    fn bit(self) -> u32 {
        match self {
            Self::SizeX => 0x01,
            Self::SizeY => 0x02,
            Self::PositionX => 0x04,
            Self::PositionY => 0x08,
            Self::Rotation => 0x10,
        }
    }

    fn command_field(self) -> Field {
        use layout::set_dve as l;
        match self {
            Self::SizeX => l::SIZE_X,
            Self::SizeY => l::SIZE_Y,
            Self::PositionX => l::POSITION_X,
            Self::PositionY => l::POSITION_Y,
            Self::Rotation => l::ROTATION,
        }
    }

    fn get(self, dve: &DveTransform) -> f64 {
        match self {
            Self::SizeX => dve.size_x,
            Self::SizeY => dve.size_y,
            Self::PositionX => dve.position_x,
            Self::PositionY => dve.position_y,
            Self::Rotation => dve.rotation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamKeyState {
    pub key_type: KeyType,
    pub fly_enabled: bool,
    pub fill_source: u16,
    pub key_source: u16,
    pub mask: KeyMask,
    pub luma: LumaParameters,
    pub dve: DveTransform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpstreamKeyEvent {
    Type { id: KeyerId, key_type: KeyType, fly_enabled: bool },
    Sources { id: KeyerId, fill: u16, key: u16 },
    Mask { id: KeyerId, mask: KeyMask },
    Luma { id: KeyerId, luma: LumaParameters },
    Dve { id: KeyerId, dve: DveTransform },
}

impl InstanceEvent for UpstreamKeyEvent {
    type Instance = KeyerId;

    fn instance(&self) -> KeyerId {
        match *self {
            Self::Type { id, .. }
            | Self::Sources { id, .. }
            | Self::Mask { id, .. }
            | Self::Luma { id, .. }
            | Self::Dve { id, .. } => id,
        }
    }
}

/// Mirror of all upstream keyers.
pub struct UpstreamKey {
    link: FeatureLink,
    mirror: Mirror<KeyerId, UpstreamKeyState>,
    notifier: Notifier<UpstreamKeyEvent>,
}

impl UpstreamKey {
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

    pub fn subscribe(&self) -> EventStream<UpstreamKeyEvent> {
        self.notifier.subscribe()
    }

    pub fn state(&self, me: u8, keyer: u8) -> Option<UpstreamKeyState> {
        self.mirror.get((me, keyer))
    }

    pub fn keyers(&self) -> BTreeMap<KeyerId, UpstreamKeyState> {
        self.mirror.snapshot()
    }

    pub fn set_key_type(&self, me: u8, keyer: u8, key_type: KeyType) -> Result<bool> {
        use layout::set_type as l;
        let cached = self.mirror.read((me, keyer), |s| s.key_type);
        self.link.send_if_changed(cached, key_type, || {
            Ok(Self::type_command(me, keyer)?
                .set_raw(l::TYPE_BIT, l::TYPE, i64::from(key_type.to_raw()))?
                .finish())
        })
    }

    pub fn set_fly_enabled(&self, me: u8, keyer: u8, enabled: bool) -> Result<bool> {
        use layout::set_type as l;
        let cached = self.mirror.read((me, keyer), |s| s.fly_enabled);
        self.link.send_if_changed(cached, enabled, || {
            Ok(Self::type_command(me, keyer)?
                .set_bool(l::FLY_BIT, l::FLY_ENABLED, enabled)?
                .finish())
        })
    }

    pub fn set_fill_source(&self, me: u8, keyer: u8, source: u16) -> Result<bool> {
        let cached = self.mirror.read((me, keyer), |s| s.fill_source);
        self.link.send_if_changed(cached, source, || {
            Self::source_command(tags::SET_FILL, me, keyer, source)
        })
    }

    pub fn set_key_source(&self, me: u8, keyer: u8, source: u16) -> Result<bool> {
        let cached = self.mirror.read((me, keyer), |s| s.key_source);
        self.link.send_if_changed(cached, source, || {
            Self::source_command(tags::SET_KEY, me, keyer, source)
        })
    }

    pub fn set_masked(&self, me: u8, keyer: u8, enabled: bool) -> Result<bool> {
        use layout::set_mask as l;
        let cached = self.mirror.read((me, keyer), |s| i64::from(s.mask.enabled));
        let raw = i64::from(enabled);
        self.mask_field((me, keyer), cached, mask_bits::ENABLED, l::MASK.enabled, raw)
    }

    pub fn set_mask_edge(&self, me: u8, keyer: u8, edge: MaskEdge, value: f64) -> Result<bool> {
        use layout::set_mask as l;
        let field = l::MASK.edge(edge);
        let cached = raw_of(field, self.mirror.read((me, keyer), |s| s.mask.edge(edge)));
        self.mask_field((me, keyer), cached, mask_bits::edge(edge), field, field.encode(value)?)
    }

    pub fn set_luma_pre_multiplied(&self, me: u8, keyer: u8, enabled: bool) -> Result<bool> {
        use layout::set_luma as l;
        let cached = self.mirror.read((me, keyer), |s| i64::from(s.luma.pre_multiplied));
        let raw = i64::from(enabled);
        self.luma_field((me, keyer), cached, l::PRE_MULTIPLIED_BIT, l::PRE_MULTIPLIED, raw)
    }

    pub fn set_luma_clip(&self, me: u8, keyer: u8, clip: f64) -> Result<bool> {
        use layout::set_luma as l;
        let cached = raw_of(l::CLIP, self.mirror.read((me, keyer), |s| s.luma.clip));
        self.luma_field((me, keyer), cached, l::CLIP_BIT, l::CLIP, l::CLIP.encode(clip)?)
    }

    pub fn set_luma_gain(&self, me: u8, keyer: u8, gain: f64) -> Result<bool> {
        use layout::set_luma as l;
        let cached = raw_of(l::GAIN, self.mirror.read((me, keyer), |s| s.luma.gain));
        self.luma_field((me, keyer), cached, l::GAIN_BIT, l::GAIN, l::GAIN.encode(gain)?)
    }

    pub fn set_luma_invert(&self, me: u8, keyer: u8, invert: bool) -> Result<bool> {
        use layout::set_luma as l;
        let cached = self.mirror.read((me, keyer), |s| i64::from(s.luma.invert));
        self.luma_field((me, keyer), cached, l::INVERT_BIT, l::INVERT, i64::from(invert))
    }

    /// Change one DVE parameter.
    pub fn set_dve(&self, me: u8, keyer: u8, parameter: DveParameter, value: f64) -> Result<bool> {
        use layout::set_dve as l;
        let field = parameter.command_field();
        let requested = field.encode(value)?;
        let cached = raw_of(field, self.mirror.read((me, keyer), |s| parameter.get(&s.dve)));
        self.link.send_if_changed(cached, requested, || {
            Ok(GroupCommand::new(tags::SET_DVE, Width::U32, l::LEN)
                .with(l::ME, f64::from(me))?
                .with(l::KEYER, f64::from(keyer))?
                .set_raw(parameter.bit(), field, requested)?
                .finish())
        })
    }

    fn type_command(me: u8, keyer: u8) -> Result<GroupCommand> {
        use layout::set_type as l;
        GroupCommand::new(tags::SET_TYPE, Width::U8, l::LEN)
            .with(l::ME, f64::from(me))?
            .with(l::KEYER, f64::from(keyer))
    }

    fn source_command(tag: Tag, me: u8, keyer: u8, source: u16) -> Result<(Tag, Bytes)> {
        command(
            tag,
            layout::set_source::LEN,
            &[
                (layout::ME, i64::from(me)),
                (layout::KEYER, i64::from(keyer)),
                (layout::set_source::SOURCE, i64::from(source)),
            ],
        )
    }

    fn mask_field(
        &self,
        (me, keyer): KeyerId,
        cached: Option<i64>,
        bit: u32,
        field: Field,
        raw: i64,
    ) -> Result<bool> {
        use layout::set_mask as l;
        self.link.send_if_changed(cached, raw, || {
            Ok(mask_command(
                tags::SET_MASK,
                l::LEN,
                &[(l::ME, i64::from(me)), (l::KEYER, i64::from(keyer))],
            )?
            .set_raw(bit, field, raw)?
            .finish())
        })
    }

    fn luma_field(
        &self,
        (me, keyer): KeyerId,
        cached: Option<i64>,
        bit: u32,
        field: Field,
        raw: i64,
    ) -> Result<bool> {
        use layout::set_luma as l;
        self.link.send_if_changed(cached, raw, || {
            Ok(GroupCommand::new(tags::SET_LUMA, Width::U8, l::LEN)
                .with(l::ME, f64::from(me))?
                .with(l::KEYER, f64::from(keyer))?
                .set_raw(bit, field, raw)?
                .finish())
        })
    }

    fn decode(&self, tag: Tag, body: &[u8]) -> Result<()> {
        let id = (layout::ME.read_u8(body)?, layout::KEYER.read_u8(body)?);
        let mut events = Vec::new();

        match tag {
            tags::BASE => {
                use layout::base as l;
                let key_type = KeyType::from_raw(l::TYPE.read_u8(body)?);
                let fly_enabled = l::FLY_ENABLED.read_bool(body)?;
                let fill = l::FILL.read_u16(body)?;
                let key = l::KEY.read_u16(body)?;
                let mask = l::MASK.decode(body)?;

                self.mirror.update(id, |s| {
                    if apply(&mut s.key_type, key_type) | apply(&mut s.fly_enabled, fly_enabled) {
                        events.push(UpstreamKeyEvent::Type { id, key_type, fly_enabled });
                    }
                    if apply(&mut s.fill_source, fill) | apply(&mut s.key_source, key) {
                        events.push(UpstreamKeyEvent::Sources { id, fill, key });
                    }
                    if apply(&mut s.mask, mask) {
                        events.push(UpstreamKeyEvent::Mask { id, mask });
                    }
                });
            }
            tags::LUMA => {
                use layout::luma as l;
                let luma = LumaParameters {
                    pre_multiplied: l::PRE_MULTIPLIED.read_bool(body)?,
                    clip: l::CLIP.read(body)?,
                    gain: l::GAIN.read(body)?,
                    invert: l::INVERT.read_bool(body)?,
                };
                if self.mirror.update(id, |s| apply(&mut s.luma, luma)) {
                    events.push(UpstreamKeyEvent::Luma { id, luma });
                }
            }
            tags::DVE => {
                use layout::dve as l;
                let dve = DveTransform {
                    size_x: l::SIZE_X.read(body)?,
                    size_y: l::SIZE_Y.read(body)?,
                    position_x: l::POSITION_X.read(body)?,
                    position_y: l::POSITION_Y.read(body)?,
                    rotation: l::ROTATION.read(body)?,
                };
                if self.mirror.update(id, |s| apply(&mut s.dve, dve)) {
                    events.push(UpstreamKeyEvent::Dve { id, dve });
                }
            }
            _ => {}
        }

        for event in events {
            self.notifier.emit(event);
        }
        Ok(())
    }
}

impl RecordHandler for UpstreamKey {
    fn handle_record(&self, tag: Tag, body: &Bytes) -> Result<()> {
        self.decode(tag, body)
    }
}
