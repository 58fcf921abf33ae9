//! Camera control: lens, camera and chip color-correction parameters of
//! cameras attached to switcher inputs.
//!
//! Both directions use one record shape, addressed by input and a
//! `(domain, feature)` pair:
//!
//! ```text
//! 0       1        2         3          4          ..   16            16+2n
//! ┌───────┬────────┬─────────┬──────────┬──────────┬────┬─────────────┐
//! │ input │ domain │ feature │ relative │ datatype │ .. │ n × i16 BE  │
//! └───────┴────────┴─────────┴──────────┴──────────┴────┴─────────────┘
//! ```
//!
//! Normalized lens values use the 5.11 fixed-point format (÷2048); the
//! color-correction families use ÷4096 (lift), ÷8192 (gamma) and ÷2048
//! (gain, offset), four signed components each.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::{apply, EventStream, FeatureLink, InstanceEvent, Mirror, Notifier};
use crate::client::Client;
use crate::codec::fixed_point::{GAIN, GAMMA, LIFT};
use crate::codec::Field;
use crate::error::{AtemError, Result};
use crate::handler::{CommandDispatcher, RecordHandler};
use crate::protocol::Tag;
use crate::writer::CommandSink;

const STATUS: Tag = Tag::new(*b"CCdP");
const SET: Tag = Tag::new(*b"CCmd");

mod layout {
    use crate::codec::Field;

    pub const INPUT: Field = Field::u8(0);
    pub const DOMAIN: Field = Field::u8(1);
    pub const FEATURE: Field = Field::u8(2);
    pub const RELATIVE: Field = Field::u8(3);
    pub const DATA_TYPE: Field = Field::u8(4);
    pub const COUNT: Field = Field::u8(11);
    pub const VALUES_START: usize = 16;
    pub const MAX_VALUES: usize = 4;
    pub const LEN: usize = VALUES_START + 2 * MAX_VALUES;

    pub mod data_type {
        pub const VOID: i64 = 0x00;
        pub const INT16: i64 = 0x02;
        pub const FIXED16: i64 = 0x80;
    }

    /// The `index`th 16-bit value.
    pub const fn value(index: usize) -> Field {
        Field::i16(VALUES_START + 2 * index)
    }
}

/// Fixed-point divisor of the normalized lens values.
const LENS: f64 = 2048.0;

/// Addressable camera parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CameraParameter {
    /// 0.0 (near) to 1.0 (far).
    Focus,
    /// One-shot action.
    AutoFocus,
    /// 0.0 (open) to 1.0 (closed).
    Iris,
    /// One-shot action.
    AutoIris,
    /// -1.0 to 1.0.
    ZoomSpeed,
    /// dB.
    Gain,
    /// Kelvin.
    WhiteBalance,
    Lift,
    Gamma,
    ColorGain,
    Offset,
}

enum Kind {
    Action,
    Scalar(f64),
    Integer,
    Color(f64),
}

impl CameraParameter {
    pub const ALL: [CameraParameter; 11] = [
        Self::Focus,
        Self::AutoFocus,
        Self::Iris,
        Self::AutoIris,
        Self::ZoomSpeed,
        Self::Gain,
        Self::WhiteBalance,
        Self::Lift,
        Self::Gamma,
        Self::ColorGain,
        Self::Offset,
    ];

    /// `(domain, feature)` on the wire.
    pub fn address(self) -> (u8, u8) {
        match self {
            Self::Focus => (0, 0),
            Self::AutoFocus => (0, 1),
            Self::Iris => (0, 3),
            Self::AutoIris => (0, 5),
            Self::ZoomSpeed => (0, 9),
            Self::Gain => (1, 1),
            Self::WhiteBalance => (1, 2),
            Self::Lift => (8, 0),
            Self::Gamma => (8, 1),
            Self::ColorGain => (8, 2),
            Self::Offset => (8, 3),
        }
    }

    pub fn from_address(domain: u8, feature: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.address() == (domain, feature))
    }

    fn kind(self) -> Kind {
        match self {
            Self::AutoFocus | Self::AutoIris => Kind::Action,
            Self::Focus | Self::Iris | Self::ZoomSpeed => Kind::Scalar(LENS),
            Self::Gain | Self::WhiteBalance => Kind::Integer,
            Self::Lift => Kind::Color(LIFT),
            Self::Gamma => Kind::Color(GAMMA),
            Self::ColorGain | Self::Offset => Kind::Color(GAIN),
        }
    }

    fn value_count(self) -> usize {
        match self.kind() {
            Kind::Action => 0,
            Kind::Scalar(_) | Kind::Integer => 1,
            Kind::Color(_) => 4,
        }
    }

    /// Field of the `index`th value, with this parameter's scale.
    fn field(self, index: usize) -> Field {
        let field = layout::value(index);
        match self.kind() {
            Kind::Scalar(divisor) | Kind::Color(divisor) => field.scaled(divisor),
            Kind::Action | Kind::Integer => field,
        }
    }

    fn data_type(self) -> i64 {
        match self.kind() {
            Kind::Action => layout::data_type::VOID,
            Kind::Integer => layout::data_type::INT16,
            Kind::Scalar(_) | Kind::Color(_) => layout::data_type::FIXED16,
        }
    }
}

/// Red, green, blue and luma components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorComponents {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub luma: f64,
}

impl ColorComponents {
    pub fn new(red: f64, green: f64, blue: f64, luma: f64) -> Self {
        Self { red, green, blue, luma }
    }

    fn to_array(self) -> [f64; 4] {
        [self.red, self.green, self.blue, self.luma]
    }

    fn from_slice(values: &[f64]) -> Self {
        let get = |i: usize| values.get(i).copied().unwrap_or_default();
        Self::new(get(0), get(1), get(2), get(3))
    }
}

/// Value of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CameraValue {
    Scalar(f64),
    Integer(i16),
    Color(ColorComponents),
}

impl CameraValue {
    fn values(self) -> Vec<f64> {
        match self {
            Self::Scalar(v) => vec![v],
            Self::Integer(v) => vec![f64::from(v)],
            Self::Color(c) => c.to_array().to_vec(),
        }
    }
}

/// Mirrored state of one camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub focus: f64,
    pub iris: f64,
    pub zoom_speed: f64,
    pub gain: i16,
    pub white_balance: i16,
    pub lift: ColorComponents,
    pub gamma: ColorComponents,
    pub color_gain: ColorComponents,
    pub offset: ColorComponents,
}

impl CameraState {
    /// Current value; `None` for actions.
    pub fn value(&self, parameter: CameraParameter) -> Option<CameraValue> {
        use CameraParameter::*;
        Some(match parameter {
            Focus => CameraValue::Scalar(self.focus),
            Iris => CameraValue::Scalar(self.iris),
            ZoomSpeed => CameraValue::Scalar(self.zoom_speed),
            Gain => CameraValue::Integer(self.gain),
            WhiteBalance => CameraValue::Integer(self.white_balance),
            Lift => CameraValue::Color(self.lift),
            Gamma => CameraValue::Color(self.gamma),
            ColorGain => CameraValue::Color(self.color_gain),
            Offset => CameraValue::Color(self.offset),
            AutoFocus | AutoIris => return None,
        })
    }

    /// Store a decoded value; true when it changed.
    fn store(&mut self, parameter: CameraParameter, value: CameraValue) -> bool {
        use CameraParameter::*;
        match (parameter, value) {
            (Focus, CameraValue::Scalar(v)) => apply(&mut self.focus, v),
            (Iris, CameraValue::Scalar(v)) => apply(&mut self.iris, v),
            (ZoomSpeed, CameraValue::Scalar(v)) => apply(&mut self.zoom_speed, v),
            (Gain, CameraValue::Integer(v)) => apply(&mut self.gain, v),
            (WhiteBalance, CameraValue::Integer(v)) => apply(&mut self.white_balance, v),
            (Lift, CameraValue::Color(c)) => apply(&mut self.lift, c),
            (Gamma, CameraValue::Color(c)) => apply(&mut self.gamma, c),
            (ColorGain, CameraValue::Color(c)) => apply(&mut self.color_gain, c),
            (Offset, CameraValue::Color(c)) => apply(&mut self.offset, c),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub input: u8,
    pub parameter: CameraParameter,
    pub value: CameraValue,
}

impl InstanceEvent for CameraEvent {
    type Instance = u8;

    fn instance(&self) -> u8 {
        self.input
    }
}

/// Mirror of every camera the device reported.
pub struct CameraControl {
    link: FeatureLink,
    mirror: Mirror<u8, CameraState>,
    notifier: Notifier<CameraEvent>,
}

impl CameraControl {
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

    pub fn subscribe(&self) -> EventStream<CameraEvent> {
        self.notifier.subscribe()
    }

    pub fn state(&self, input: u8) -> Option<CameraState> {
        self.mirror.get(input)
    }

    pub fn cameras(&self) -> BTreeMap<u8, CameraState> {
        self.mirror.snapshot()
    }

    pub fn value(&self, input: u8, parameter: CameraParameter) -> Option<CameraValue> {
        self.mirror.read(input, |s| s.value(parameter)).flatten()
    }

    /// Set any parameter. Returns whether a command was sent.
    pub fn set(&self, input: u8, parameter: CameraParameter, value: CameraValue) -> Result<bool> {
        let requested = encode_values(parameter, value)?;
        let cached = self
            .value(input, parameter)
            .and_then(|v| encode_values(parameter, v).ok());
        self.link.send_if_changed(cached, requested.clone(), || {
            build_command(input, parameter, &requested)
        })
    }

    pub fn set_focus(&self, input: u8, focus: f64) -> Result<bool> {
        self.set(input, CameraParameter::Focus, CameraValue::Scalar(focus))
    }

    pub fn set_iris(&self, input: u8, iris: f64) -> Result<bool> {
        self.set(input, CameraParameter::Iris, CameraValue::Scalar(iris))
    }

    pub fn set_zoom_speed(&self, input: u8, speed: f64) -> Result<bool> {
        self.set(input, CameraParameter::ZoomSpeed, CameraValue::Scalar(speed))
    }

    pub fn set_gain(&self, input: u8, gain: i16) -> Result<bool> {
        self.set(input, CameraParameter::Gain, CameraValue::Integer(gain))
    }

    pub fn set_white_balance(&self, input: u8, kelvin: i16) -> Result<bool> {
        self.set(input, CameraParameter::WhiteBalance, CameraValue::Integer(kelvin))
    }

    pub fn set_lift(&self, input: u8, lift: ColorComponents) -> Result<bool> {
        self.set(input, CameraParameter::Lift, CameraValue::Color(lift))
    }

    pub fn set_gamma(&self, input: u8, gamma: ColorComponents) -> Result<bool> {
        self.set(input, CameraParameter::Gamma, CameraValue::Color(gamma))
    }

    pub fn set_color_gain(&self, input: u8, gain: ColorComponents) -> Result<bool> {
        self.set(input, CameraParameter::ColorGain, CameraValue::Color(gain))
    }

    pub fn set_offset(&self, input: u8, offset: ColorComponents) -> Result<bool> {
        self.set(input, CameraParameter::Offset, CameraValue::Color(offset))
    }

    /// Trigger a one-shot auto focus.
    pub fn auto_focus(&self, input: u8) -> Result<()> {
        self.link.send(build_command(input, CameraParameter::AutoFocus, &[])?)
    }

    /// Trigger a one-shot auto iris.
    pub fn auto_iris(&self, input: u8) -> Result<()> {
        self.link.send(build_command(input, CameraParameter::AutoIris, &[])?)
    }

    fn decode(&self, body: &[u8]) -> Result<()> {
        let input = layout::INPUT.read_u8(body)?;
        let domain = layout::DOMAIN.read_u8(body)?;
        let feature = layout::FEATURE.read_u8(body)?;

        let Some(parameter) = CameraParameter::from_address(domain, feature) else {
            tracing::trace!("Ignoring camera parameter {}.{}", domain, feature);
            return Ok(());
        };

        let value = match parameter.kind() {
            Kind::Action => return Ok(()),
            Kind::Scalar(_) => CameraValue::Scalar(parameter.field(0).read(body)?),
            Kind::Integer => CameraValue::Integer(parameter.field(0).read_raw(body)? as i16),
            Kind::Color(_) => {
                let values = (0..4)
                    .map(|i| parameter.field(i).read(body))
                    .collect::<Result<Vec<f64>>>()?;
                CameraValue::Color(ColorComponents::from_slice(&values))
            }
        };

        if self.mirror.update(input, |s| s.store(parameter, value)) {
            self.notifier.emit(CameraEvent { input, parameter, value });
        }
        Ok(())
    }
}

impl RecordHandler for CameraControl {
    fn handle_record(&self, _tag: Tag, body: &Bytes) -> Result<()> {
        self.decode(body)
    }
}

/// Raw wire integers for `value`, checked against the parameter's shape.
fn encode_values(parameter: CameraParameter, value: CameraValue) -> Result<Vec<i64>> {
    let values = value.values();
    if values.len() != parameter.value_count() {
        return Err(AtemError::InvalidValue(format!(
            "{:?} takes {} values, got {}",
            parameter,
            parameter.value_count(),
            values.len()
        )));
    }
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| parameter.field(i).encode(v))
        .collect()
}

fn build_command(input: u8, parameter: CameraParameter, raw: &[i64]) -> Result<(Tag, Bytes)> {
    let (domain, feature) = parameter.address();
    let mut body = BytesMut::zeroed(layout::LEN);
    layout::INPUT.write_raw(&mut body, i64::from(input))?;
    layout::DOMAIN.write_raw(&mut body, i64::from(domain))?;
    layout::FEATURE.write_raw(&mut body, i64::from(feature))?;
    layout::RELATIVE.write_raw(&mut body, 0)?;
    layout::DATA_TYPE.write_raw(&mut body, parameter.data_type())?;
    layout::COUNT.write_raw(&mut body, raw.len() as i64)?;
    for (i, &value) in raw.iter().enumerate() {
        parameter.field(i).write_raw(&mut body, value)?;
    }
    Ok((SET, body.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Record;
    use crate::writer::RecordingSink;

    fn setup() -> (CommandDispatcher, Arc<RecordingSink>, Arc<CameraControl>) {
        let dispatcher = CommandDispatcher::new();
        let sink = Arc::new(RecordingSink::new());
        let module = CameraControl::attach_to(&dispatcher, sink.clone(), 16);
        (dispatcher, sink, module)
    }

    fn status(input: u8, domain: u8, feature: u8, values: &[i16]) -> Record {
        let mut body = vec![0u8; 24];
        body[0] = input;
        body[1] = domain;
        body[2] = feature;
        for (i, v) in values.iter().enumerate() {
            body[16 + 2 * i..18 + 2 * i].copy_from_slice(&v.to_be_bytes());
        }
        Record::new(STATUS, Bytes::from(body))
    }

    #[test]
    fn test_focus_decoded() {
        let (dispatcher, _sink, cameras) = setup();
        let mut events = cameras.subscribe();
        dispatcher.dispatch(&status(1, 0, 0, &[1024])).unwrap();

        assert_eq!(cameras.state(1).unwrap().focus, 0.5);
        assert_eq!(
            events.try_recv(),
            Some(CameraEvent {
                input: 1,
                parameter: CameraParameter::Focus,
                value: CameraValue::Scalar(0.5)
            })
        );
    }

    #[test]
    fn test_color_families_scale() {
        let (dispatcher, _sink, cameras) = setup();
        dispatcher.dispatch(&status(1, 8, 0, &[4096, -2048, 0, 1024])).unwrap();
        dispatcher.dispatch(&status(1, 8, 1, &[8192, 0, 0, 0])).unwrap();
        dispatcher.dispatch(&status(1, 8, 2, &[2048, 4096, 0, 0])).unwrap();

        let state = cameras.state(1).unwrap();
        assert_eq!(state.lift, ColorComponents::new(1.0, -0.5, 0.0, 0.25));
        assert_eq!(state.gamma.red, 1.0);
        assert_eq!(state.color_gain.green, 2.0);
    }

    #[test]
    fn test_setter_idempotent_and_encoded() {
        let (dispatcher, sink, cameras) = setup();
        dispatcher.dispatch(&status(2, 1, 2, &[5600])).unwrap();

        assert!(!cameras.set_white_balance(2, 5600).unwrap());
        assert!(sink.is_empty());

        assert!(cameras.set_white_balance(2, 3200).unwrap());
        let sent = sink.take().remove(0);
        assert_eq!(sent.tag, SET);
        assert_eq!(&sent.body[..5], &[2, 1, 2, 0, 0x02]);
        assert_eq!(sent.body[11], 1);
        assert_eq!(&sent.body[16..18], &3200i16.to_be_bytes());
    }

    #[test]
    fn test_lift_command() {
        let (_dispatcher, sink, cameras) = setup();
        let lift = ColorComponents::new(0.5, 0.0, -0.25, 0.0);
        assert!(cameras.set_lift(3, lift).unwrap());

        let body = sink.take().remove(0).body;
        assert_eq!(body.len(), 24);
        assert_eq!(body[4], 0x80);
        assert_eq!(body[11], 4);
        assert_eq!(&body[16..18], &2048i16.to_be_bytes());
        assert_eq!(&body[20..22], &(-1024i16).to_be_bytes());
    }

    #[test]
    fn test_actions_always_send() {
        let (_dispatcher, sink, cameras) = setup();
        cameras.auto_focus(1).unwrap();
        cameras.auto_iris(1).unwrap();
        let sent = sink.take();
        assert_eq!(&sent[0].body[..3], &[1, 0, 1]);
        assert_eq!(&sent[1].body[..3], &[1, 0, 5]);
    }

    #[test]
    fn test_mismatched_value_rejected() {
        let (_dispatcher, sink, cameras) = setup();
        let result = cameras.set(1, CameraParameter::Lift, CameraValue::Scalar(1.0));
        assert!(matches!(result, Err(AtemError::InvalidValue(_))));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unknown_parameter_ignored() {
        let (dispatcher, _sink, cameras) = setup();
        dispatcher.dispatch(&status(1, 4, 7, &[1])).unwrap();
        assert!(cameras.state(1).is_none());
    }

    #[test]
    fn test_address_lookup() {
        for parameter in CameraParameter::ALL {
            let (domain, feature) = parameter.address();
            assert_eq!(CameraParameter::from_address(domain, feature), Some(parameter));
        }
    }
}
