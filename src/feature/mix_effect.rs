//! Mix-effect buses: program/preview routing, transitions, fade to black
//! and keyer on-air state.
//!
//! Status records (device → client):
//!
//! | Tag    | Fields                                                   |
//! |--------|----------------------------------------------------------|
//! | `PrgI` | me, program source                                       |
//! | `PrvI` | me, preview source                                       |
//! | `TrPs` | me, in transition, frames remaining, position (÷10000)   |
//! | `TrSS` | me, style, keyers, next style, next keyers               |
//! | `TrPr` | me, preview transition                                   |
//! | `TMxP` | me, mix rate                                             |
//! | `FtbS` | me, fully black, in transition, frames remaining         |
//! | `FtbP` | me, fade-to-black rate                                   |
//! | `KeOn` | me, keyer, on air                                        |

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{
    apply, command, raw_of, EventStream, FeatureLink, InstanceEvent, Mirror, Notifier,
};
use crate::client::Client;
use crate::codec::{GroupCommand, Width};
use crate::error::Result;
use crate::handler::{CommandDispatcher, RecordHandler};
use crate::protocol::Tag;
use crate::writer::CommandSink;

mod tags {
    use crate::protocol::Tag;

    pub const PROGRAM_INPUT: Tag = Tag::new(*b"PrgI");
    pub const PREVIEW_INPUT: Tag = Tag::new(*b"PrvI");
    pub const TRANSITION_POSITION: Tag = Tag::new(*b"TrPs");
    pub const TRANSITION_SETTINGS: Tag = Tag::new(*b"TrSS");
    pub const TRANSITION_PREVIEW: Tag = Tag::new(*b"TrPr");
    pub const MIX_RATE: Tag = Tag::new(*b"TMxP");
    pub const FADE_TO_BLACK_STATE: Tag = Tag::new(*b"FtbS");
    pub const FADE_TO_BLACK_RATE: Tag = Tag::new(*b"FtbP");
    pub const KEYER_ON_AIR: Tag = Tag::new(*b"KeOn");

    pub const SET_PROGRAM_INPUT: Tag = Tag::new(*b"CPgI");
    pub const SET_PREVIEW_INPUT: Tag = Tag::new(*b"CPvI");
    pub const CUT: Tag = Tag::new(*b"DCut");
    pub const AUTO: Tag = Tag::new(*b"DAut");
    pub const SET_TRANSITION_POSITION: Tag = Tag::new(*b"CTPs");
    pub const SET_TRANSITION_SETTINGS: Tag = Tag::new(*b"CTTp");
    pub const SET_TRANSITION_PREVIEW: Tag = Tag::new(*b"CTPr");
    pub const SET_MIX_RATE: Tag = Tag::new(*b"CTMx");
    pub const FADE_TO_BLACK: Tag = Tag::new(*b"FtbA");
    pub const SET_FADE_TO_BLACK: Tag = Tag::new(*b"FtbC");
    pub const SET_KEYER_ON_AIR: Tag = Tag::new(*b"CKOn");

    pub const STATUS: &[Tag] = &[
        PROGRAM_INPUT,
        PREVIEW_INPUT,
        TRANSITION_POSITION,
        TRANSITION_SETTINGS,
        TRANSITION_PREVIEW,
        MIX_RATE,
        FADE_TO_BLACK_STATE,
        FADE_TO_BLACK_RATE,
        KEYER_ON_AIR,
    ];
}

/// Field tables, one module per record layout.
mod layout {
    use crate::codec::fixed_point::TRANSITION_POSITION;
    use crate::codec::Field;

    /// Every mix-effect record addresses its bus in byte 0.
    pub const ME: Field = Field::u8(0);

    pub mod input {
        use super::Field;
        pub const SOURCE: Field = Field::u16(2);
        pub const LEN: usize = 4;
    }

    pub mod position {
        use super::*;
        pub const IN_TRANSITION: Field = Field::u8(1);
        pub const FRAMES_REMAINING: Field = Field::u8(2);
        pub const POSITION: Field = Field::u16(4).scaled(TRANSITION_POSITION);
    }

    pub mod settings {
        use super::Field;
        pub const STYLE: Field = Field::u8(1);
        pub const KEYERS: Field = Field::u8(2);
        pub const NEXT_STYLE: Field = Field::u8(3);
        pub const NEXT_KEYERS: Field = Field::u8(4);
    }

    pub mod set_position {
        use super::*;
        pub const POSITION: Field = Field::u16(2).scaled(TRANSITION_POSITION);
        pub const LEN: usize = 4;
    }

    /// `CTTp`, a group command.
    pub mod set_settings {
        use super::Field;
        pub const STYLE_BIT: u32 = 0x01;
        pub const KEYERS_BIT: u32 = 0x02;
        pub const ME: Field = Field::u8(1);
        pub const STYLE: Field = Field::u8(2);
        pub const KEYERS: Field = Field::u8(3);
        pub const LEN: usize = 4;
    }

    /// `TrPr`, `TMxP`, `FtbP`, `CTPr` and `CTMx` share this shape.
    pub mod single {
        use super::Field;
        pub const VALUE: Field = Field::u8(1);
        pub const LEN: usize = 4;
    }

    pub mod ftb_state {
        use super::Field;
        pub const FULLY_BLACK: Field = Field::u8(1);
        pub const IN_TRANSITION: Field = Field::u8(2);
        pub const FRAMES_REMAINING: Field = Field::u8(3);
    }

    /// `FtbC`, a group command.
    pub mod set_ftb {
        use super::Field;
        pub const RATE_BIT: u32 = 0x01;
        pub const ME: Field = Field::u8(1);
        pub const RATE: Field = Field::u8(2);
        pub const LEN: usize = 4;
    }

    /// `KeOn` and `CKOn`.
    pub mod on_air {
        use super::Field;
        pub const KEYER: Field = Field::u8(1);
        pub const ON_AIR: Field = Field::u8(2);
        pub const LEN: usize = 4;
    }

    /// `DCut`, `DAut`, `FtbA`.
    pub const ACTION_LEN: usize = 4;
}

/// Transition style selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionStyle {
    #[default]
    Mix,
    Dip,
    Wipe,
    Dve,
    Stinger,
    Other(u8),
}

impl TransitionStyle {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Mix,
            1 => Self::Dip,
            2 => Self::Wipe,
            3 => Self::Dve,
            4 => Self::Stinger,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Self::Mix => 0,
            Self::Dip => 1,
            Self::Wipe => 2,
            Self::Dve => 3,
            Self::Stinger => 4,
            Self::Other(raw) => raw,
        }
    }
}

/// Progress of the current transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionState {
    pub in_transition: bool,
    pub frames_remaining: u8,
    /// 0.0 to 1.0.
    pub position: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FadeToBlackState {
    pub fully_black: bool,
    pub in_transition: bool,
    pub frames_remaining: u8,
}

/// Mirrored state of one mix-effect bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixEffectState {
    pub program_input: u16,
    pub preview_input: u16,
    pub transition: TransitionState,
    pub style: TransitionStyle,
    pub next_style: TransitionStyle,
    /// Bit 0 is the background, bits 1.. the upstream keyers.
    pub keyers: u8,
    pub next_keyers: u8,
    pub preview_transition: bool,
    pub mix_rate: u8,
    pub fade_to_black: FadeToBlackState,
    pub fade_to_black_rate: u8,
    pub keyers_on_air: BTreeMap<u8, bool>,
}

/// Change notification, one per field group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MixEffectEvent {
    ProgramInput { me: u8, source: u16 },
    PreviewInput { me: u8, source: u16 },
    Transition { me: u8, state: TransitionState },
    Style { me: u8, style: TransitionStyle, next_style: TransitionStyle },
    Keyers { me: u8, keyers: u8, next_keyers: u8 },
    PreviewTransition { me: u8, enabled: bool },
    MixRate { me: u8, rate: u8 },
    FadeToBlack { me: u8, state: FadeToBlackState },
    FadeToBlackRate { me: u8, rate: u8 },
    KeyerOnAir { me: u8, keyer: u8, on_air: bool },
}

impl InstanceEvent for MixEffectEvent {
    type Instance = u8;

    fn instance(&self) -> u8 {
        match *self {
            Self::ProgramInput { me, .. }
            | Self::PreviewInput { me, .. }
            | Self::Transition { me, .. }
            | Self::Style { me, .. }
            | Self::Keyers { me, .. }
            | Self::PreviewTransition { me, .. }
            | Self::MixRate { me, .. }
            | Self::FadeToBlack { me, .. }
            | Self::FadeToBlackRate { me, .. }
            | Self::KeyerOnAir { me, .. } => me,
        }
    }
}

/// Mirror of all mix-effect buses.
pub struct MixEffect {
    link: FeatureLink,
    mirror: Mirror<u8, MixEffectState>,
    notifier: Notifier<MixEffectEvent>,
}

impl MixEffect {
    /// Attach to a client's dispatcher and command queue.
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

    pub fn subscribe(&self) -> EventStream<MixEffectEvent> {
        self.notifier.subscribe()
    }

    /// Cached state of one bus, `None` until the device reported it.
    pub fn state(&self, me: u8) -> Option<MixEffectState> {
        self.mirror.get(me)
    }

    pub fn buses(&self) -> BTreeMap<u8, MixEffectState> {
        self.mirror.snapshot()
    }

    pub fn program_input(&self, me: u8) -> Option<u16> {
        self.mirror.read(me, |s| s.program_input)
    }

    pub fn preview_input(&self, me: u8) -> Option<u16> {
        self.mirror.read(me, |s| s.preview_input)
    }

    pub fn transition(&self, me: u8) -> Option<TransitionState> {
        self.mirror.read(me, |s| s.transition)
    }

    pub fn fade_to_black(&self, me: u8) -> Option<FadeToBlackState> {
        self.mirror.read(me, |s| s.fade_to_black)
    }

    pub fn keyer_on_air(&self, me: u8, keyer: u8) -> Option<bool> {
        self.mirror
            .read(me, |s| s.keyers_on_air.get(&keyer).copied())
            .flatten()
    }

    // Setters. Each returns whether a command was sent.

    pub fn set_program_input(&self, me: u8, source: u16) -> Result<bool> {
        self.link
            .send_if_changed(self.program_input(me), source, || {
                Self::input_command(tags::SET_PROGRAM_INPUT, me, source)
            })
    }

    pub fn set_preview_input(&self, me: u8, source: u16) -> Result<bool> {
        self.link
            .send_if_changed(self.preview_input(me), source, || {
                Self::input_command(tags::SET_PREVIEW_INPUT, me, source)
            })
    }

    /// Cut between program and preview.
    pub fn cut(&self, me: u8) -> Result<()> {
        self.link.send(Self::action(tags::CUT, me)?)
    }

    /// Run the selected transition.
    pub fn auto_transition(&self, me: u8) -> Result<()> {
        self.link.send(Self::action(tags::AUTO, me)?)
    }

    /// Move the transition lever, 0.0 to 1.0.
    pub fn set_transition_position(&self, me: u8, position: f64) -> Result<bool> {
        let field = layout::set_position::POSITION;
        let requested = field.encode(position)?;
        let cached = raw_of(
            layout::position::POSITION,
            self.mirror.read(me, |s| s.transition.position),
        );
        self.link.send_if_changed(cached, requested, || {
            command(
                tags::SET_TRANSITION_POSITION,
                layout::set_position::LEN,
                &[(layout::ME, i64::from(me)), (field, requested)],
            )
        })
    }

    /// Select the style used by the next transition.
    pub fn set_transition_style(&self, me: u8, style: TransitionStyle) -> Result<bool> {
        use layout::set_settings as l;
        self.link
            .send_if_changed(self.mirror.read(me, |s| s.next_style), style, || {
                Ok(GroupCommand::new(tags::SET_TRANSITION_SETTINGS, Width::U8, l::LEN)
                    .with(l::ME, f64::from(me))?
                    .set_raw(l::STYLE_BIT, l::STYLE, i64::from(style.to_raw()))?
                    .finish())
            })
    }

    /// Select which layers the next transition affects.
    pub fn set_next_keyers(&self, me: u8, keyers: u8) -> Result<bool> {
        use layout::set_settings as l;
        self.link
            .send_if_changed(self.mirror.read(me, |s| s.next_keyers), keyers, || {
                Ok(GroupCommand::new(tags::SET_TRANSITION_SETTINGS, Width::U8, l::LEN)
                    .with(l::ME, f64::from(me))?
                    .set_raw(l::KEYERS_BIT, l::KEYERS, i64::from(keyers))?
                    .finish())
            })
    }

    pub fn set_preview_transition(&self, me: u8, enabled: bool) -> Result<bool> {
        self.link.send_if_changed(
            self.mirror.read(me, |s| s.preview_transition),
            enabled,
            || Self::single(tags::SET_TRANSITION_PREVIEW, me, i64::from(enabled)),
        )
    }

    /// Mix transition duration in frames.
    pub fn set_mix_rate(&self, me: u8, rate: u8) -> Result<bool> {
        self.link
            .send_if_changed(self.mirror.read(me, |s| s.mix_rate), rate, || {
                Self::single(tags::SET_MIX_RATE, me, i64::from(rate))
            })
    }

    /// Toggle fade to black.
    pub fn fade_to_black_toggle(&self, me: u8) -> Result<()> {
        self.link.send(Self::action(tags::FADE_TO_BLACK, me)?)
    }

    pub fn set_fade_to_black_rate(&self, me: u8, rate: u8) -> Result<bool> {
        use layout::set_ftb as l;
        self.link
            .send_if_changed(self.mirror.read(me, |s| s.fade_to_black_rate), rate, || {
                Ok(GroupCommand::new(tags::SET_FADE_TO_BLACK, Width::U8, l::LEN)
                    .with(l::ME, f64::from(me))?
                    .set_raw(l::RATE_BIT, l::RATE, i64::from(rate))?
                    .finish())
            })
    }

    pub fn set_keyer_on_air(&self, me: u8, keyer: u8, on_air: bool) -> Result<bool> {
        use layout::on_air as l;
        self.link
            .send_if_changed(self.keyer_on_air(me, keyer), on_air, || {
                command(
                    tags::SET_KEYER_ON_AIR,
                    l::LEN,
                    &[
                        (layout::ME, i64::from(me)),
                        (l::KEYER, i64::from(keyer)),
                        (l::ON_AIR, i64::from(on_air)),
                    ],
                )
            })
    }

    fn input_command(tag: Tag, me: u8, source: u16) -> Result<(Tag, Bytes)> {
        command(
            tag,
            layout::input::LEN,
            &[(layout::ME, i64::from(me)), (layout::input::SOURCE, i64::from(source))],
        )
    }

    fn single(tag: Tag, me: u8, value: i64) -> Result<(Tag, Bytes)> {
        command(
            tag,
            layout::single::LEN,
            &[(layout::ME, i64::from(me)), (layout::single::VALUE, value)],
        )
    }

    fn action(tag: Tag, me: u8) -> Result<(Tag, Bytes)> {
        command(tag, layout::ACTION_LEN, &[(layout::ME, i64::from(me))])
    }

    // Decoders.

    fn decode(&self, tag: Tag, body: &[u8]) -> Result<()> {
        let me = layout::ME.read_u8(body)?;
        let event = match tag {
            tags::PROGRAM_INPUT => {
                let source = layout::input::SOURCE.read_u16(body)?;
                self.mirror
                    .update(me, |s| apply(&mut s.program_input, source))
                    .then_some(MixEffectEvent::ProgramInput { me, source })
            }
            tags::PREVIEW_INPUT => {
                let source = layout::input::SOURCE.read_u16(body)?;
                self.mirror
                    .update(me, |s| apply(&mut s.preview_input, source))
                    .then_some(MixEffectEvent::PreviewInput { me, source })
            }
            tags::TRANSITION_POSITION => {
                use layout::position as l;
                let state = TransitionState {
                    in_transition: l::IN_TRANSITION.read_bool(body)?,
                    frames_remaining: l::FRAMES_REMAINING.read_u8(body)?,
                    position: l::POSITION.read(body)?,
                };
                self.mirror
                    .update(me, |s| apply(&mut s.transition, state))
                    .then_some(MixEffectEvent::Transition { me, state })
            }
            tags::TRANSITION_SETTINGS => {
                use layout::settings as l;
                let style = TransitionStyle::from_raw(l::STYLE.read_u8(body)?);
                let next_style = TransitionStyle::from_raw(l::NEXT_STYLE.read_u8(body)?);
                let keyers = l::KEYERS.read_u8(body)?;
                let next_keyers = l::NEXT_KEYERS.read_u8(body)?;
                let (styles_changed, keyers_changed) = self.mirror.update(me, |s| {
                    let a = apply(&mut s.style, style) | apply(&mut s.next_style, next_style);
                    let b = apply(&mut s.keyers, keyers) | apply(&mut s.next_keyers, next_keyers);
                    (a, b)
                });
                if styles_changed {
                    self.notifier.emit(MixEffectEvent::Style { me, style, next_style });
                }
                keyers_changed.then_some(MixEffectEvent::Keyers { me, keyers, next_keyers })
            }
            tags::TRANSITION_PREVIEW => {
                let enabled = layout::single::VALUE.read_bool(body)?;
                self.mirror
                    .update(me, |s| apply(&mut s.preview_transition, enabled))
                    .then_some(MixEffectEvent::PreviewTransition { me, enabled })
            }
            tags::MIX_RATE => {
                let rate = layout::single::VALUE.read_u8(body)?;
                self.mirror
                    .update(me, |s| apply(&mut s.mix_rate, rate))
                    .then_some(MixEffectEvent::MixRate { me, rate })
            }
            tags::FADE_TO_BLACK_STATE => {
                use layout::ftb_state as l;
                let state = FadeToBlackState {
                    fully_black: l::FULLY_BLACK.read_bool(body)?,
                    in_transition: l::IN_TRANSITION.read_bool(body)?,
                    frames_remaining: l::FRAMES_REMAINING.read_u8(body)?,
                };
                self.mirror
                    .update(me, |s| apply(&mut s.fade_to_black, state))
                    .then_some(MixEffectEvent::FadeToBlack { me, state })
            }
            tags::FADE_TO_BLACK_RATE => {
                let rate = layout::single::VALUE.read_u8(body)?;
                self.mirror
                    .update(me, |s| apply(&mut s.fade_to_black_rate, rate))
                    .then_some(MixEffectEvent::FadeToBlackRate { me, rate })
            }
            tags::KEYER_ON_AIR => {
                let keyer = layout::on_air::KEYER.read_u8(body)?;
                let on_air = layout::on_air::ON_AIR.read_bool(body)?;
                self.mirror
                    .update(me, |s| {
                        s.keyers_on_air.insert(keyer, on_air) != Some(on_air)
                    })
                    .then_some(MixEffectEvent::KeyerOnAir { me, keyer, on_air })
            }
            _ => None,
        };

        if let Some(event) = event {
            self.notifier.emit(event);
        }
        Ok(())
    }
}

impl RecordHandler for MixEffect {
    fn handle_record(&self, tag: Tag, body: &Bytes) -> Result<()> {
        self.decode(tag, body)
    }
}
