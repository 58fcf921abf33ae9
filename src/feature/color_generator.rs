//! Color generators.
//!
//! Hue is carried in tenths of a degree and wraps at 360; saturation and
//! luma are fractions in thousandths.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{apply, raw_of, EventStream, FeatureLink, InstanceEvent, Mirror, Notifier};
use crate::client::Client;
use crate::codec::fixed_point::{hue_from_fixed, hue_to_fixed};
use crate::codec::{Field, GroupCommand, Width};
use crate::error::{AtemError, Result};
use crate::handler::{CommandDispatcher, RecordHandler};
use crate::protocol::Tag;
use crate::writer::CommandSink;

const STATUS: Tag = Tag::new(*b"ColV");
const SET: Tag = Tag::new(*b"CClV");

mod layout {
    use crate::codec::fixed_point::PERMILLE;
    use crate::codec::Field;

    pub mod status {
        use super::*;
        pub const INDEX: Field = Field::u8(0);
        pub const HUE: Field = Field::u16(2);
        pub const SATURATION: Field = Field::u16(4).scaled(PERMILLE);
        pub const LUMA: Field = Field::u16(6).scaled(PERMILLE);
    }

    /// `CClV`, a group command.
    pub mod set {
        use super::*;
        pub const HUE_BIT: u32 = 0x01;
        pub const SATURATION_BIT: u32 = 0x02;
        pub const LUMA_BIT: u32 = 0x04;
        pub const INDEX: Field = Field::u8(1);
        pub const HUE: Field = Field::u16(2);
        pub const SATURATION: Field = Field::u16(4).scaled(PERMILLE);
        pub const LUMA: Field = Field::u16(6).scaled(PERMILLE);
        pub const LEN: usize = 8;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorGeneratorState {
    /// Degrees, 0.0 to 359.9.
    pub hue: f64,
    /// 0.0 to 1.0.
    pub saturation: f64,
    /// 0.0 to 1.0.
    pub luma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorGeneratorEvent {
    pub index: u8,
    pub color: ColorGeneratorState,
}

impl InstanceEvent for ColorGeneratorEvent {
    type Instance = u8;

    fn instance(&self) -> u8 {
        self.index
    }
}

pub struct ColorGenerator {
    link: FeatureLink,
    mirror: Mirror<u8, ColorGeneratorState>,
    notifier: Notifier<ColorGeneratorEvent>,
}

impl ColorGenerator {
    pub fn attach(client: &Client) -> Arc<Self> {
        Self::attach_to(client.dispatcher(), client.command_sink(), client.event_capacity())
    }

    pub fn attach_to(
        dispatcher: &CommandDispatcher,
        sink: Arc<dyn CommandSink>,
        event_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|module: &Weak<Self>| Self {
            link: FeatureLink::new(dispatcher, sink, &[STATUS], module),
            mirror: Mirror::new(),
            notifier: Notifier::new(event_capacity),
        })
    }

    pub fn subscribe(&self) -> EventStream<ColorGeneratorEvent> {
        self.notifier.subscribe()
    }

    pub fn color(&self, index: u8) -> Option<ColorGeneratorState> {
        self.mirror.get(index)
    }

    pub fn generators(&self) -> BTreeMap<u8, ColorGeneratorState> {
        self.mirror.snapshot()
    }

    /// Hue in degrees; any value is wrapped into 0..360.
    pub fn set_hue(&self, index: u8, degrees: f64) -> Result<bool> {
        use layout::set as l;
        if !degrees.is_finite() {
            return Err(AtemError::InvalidValue(format!("hue {} is not finite", degrees)));
        }
        let requested = i64::from(hue_to_fixed(degrees));
        let cached = self
            .mirror
            .read(index, |s| i64::from(hue_to_fixed(s.hue)));
        self.send(index, cached, l::HUE_BIT, l::HUE, requested)
    }

    pub fn set_saturation(&self, index: u8, saturation: f64) -> Result<bool> {
        use layout::set as l;
        let cached = raw_of(l::SATURATION, self.mirror.read(index, |s| s.saturation));
        let raw = l::SATURATION.encode(saturation)?;
        self.send(index, cached, l::SATURATION_BIT, l::SATURATION, raw)
    }

    pub fn set_luma(&self, index: u8, luma: f64) -> Result<bool> {
        use layout::set as l;
        let cached = raw_of(l::LUMA, self.mirror.read(index, |s| s.luma));
        self.send(index, cached, l::LUMA_BIT, l::LUMA, l::LUMA.encode(luma)?)
    }

    fn send(
        &self,
        index: u8,
        cached: Option<i64>,
        bit: u32,
        field: Field,
        raw: i64,
    ) -> Result<bool> {
        use layout::set as l;
        self.link.send_if_changed(cached, raw, || {
            Ok(GroupCommand::new(SET, Width::U8, l::LEN)
                .with(l::INDEX, f64::from(index))?
                .set_raw(bit, field, raw)?
                .finish())
        })
    }

    fn decode(&self, body: &[u8]) -> Result<()> {
        use layout::status as l;
        let index = l::INDEX.read_u8(body)?;
        let color = ColorGeneratorState {
            hue: hue_from_fixed(l::HUE.read_u16(body)?),
            saturation: l::SATURATION.read(body)?,
            luma: l::LUMA.read(body)?,
        };
        if self.mirror.update(index, |s| apply(s, color)) {
            self.notifier.emit(ColorGeneratorEvent { index, color });
        }
        Ok(())
    }
}

impl RecordHandler for ColorGenerator {
    fn handle_record(&self, _tag: Tag, body: &Bytes) -> Result<()> {
        self.decode(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Record;
    use crate::writer::RecordingSink;

    fn setup() -> (CommandDispatcher, Arc<RecordingSink>, Arc<ColorGenerator>) {
        let dispatcher = CommandDispatcher::new();
        let sink = Arc::new(RecordingSink::new());
        let module = ColorGenerator::attach_to(&dispatcher, sink.clone(), 16);
        (dispatcher, sink, module)
    }

    fn feed(dispatcher: &CommandDispatcher, body: &[u8]) {
        let record = Record::new(STATUS, Bytes::copy_from_slice(body));
        dispatcher.dispatch(&record).unwrap();
    }

    #[test]
    fn test_color_decoded() {
        let (dispatcher, _sink, colors) = setup();
        let mut events = colors.subscribe();
        // hue 120.5, saturation 0.75, luma 0.5
        feed(&dispatcher, &[1, 0, 0x04, 0xB5, 0x02, 0xEE, 0x01, 0xF4]);

        let color = colors.color(1).unwrap();
        assert_eq!(color.hue, 120.5);
        assert_eq!(color.saturation, 0.75);
        assert_eq!(color.luma, 0.5);
        assert_eq!(events.try_recv().map(|e| e.index), Some(1));
    }

    #[test]
    fn test_hue_wraps() {
        let (_dispatcher, sink, colors) = setup();
        assert!(colors.set_hue(0, 370.0).unwrap());
        let body = sink.take().remove(0).body;
        assert_eq!(body[0], 0x01);
        assert_eq!(&body[2..4], &100u16.to_be_bytes());

        assert!(colors.set_hue(0, -10.0).unwrap());
        assert_eq!(&sink.take()[0].body[2..4], &3500u16.to_be_bytes());
    }

    #[test]
    fn test_idempotent_and_single_bit() {
        let (dispatcher, sink, colors) = setup();
        feed(&dispatcher, &[0, 0, 0x04, 0xB5, 0x02, 0xEE, 0x01, 0xF4]);

        assert!(!colors.set_hue(0, 120.5).unwrap());
        // 480.5 wraps to the cached 120.5.
        assert!(!colors.set_hue(0, 480.5).unwrap());
        assert!(!colors.set_luma(0, 0.5).unwrap());
        assert!(sink.is_empty());

        assert!(colors.set_saturation(0, 1.0).unwrap());
        let body = sink.take().remove(0).body;
        assert_eq!(body[0], 0x02);
        assert_eq!(&body[4..6], &1000u16.to_be_bytes());
        assert_eq!(&body[6..8], &[0, 0]);
    }

    #[test]
    fn test_non_finite_hue_rejected() {
        let (_dispatcher, sink, colors) = setup();
        assert!(colors.set_hue(0, f64::NAN).is_err());
        assert!(sink.is_empty());
    }
}
