//! Command and event numbering for the two firmware generations.
//!
//! Older firmware ("legacy") numbers its events differently and has no live
//! training support. Each generation is described by a pair of `#[repr(u8)]`
//! enums, so codes within a table cannot collide. [`Command`] and
//! [`EventCode`] are the symbolic names shared by both tables.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CommandSet {
    Legacy,
    #[default]
    Current,
}

impl CommandSet {
    pub fn for_legacy_mode(legacy: bool) -> Self {
        if legacy { Self::Legacy } else { Self::Current }
    }

    /// Resolve the wire code for `command`, or fail if this firmware
    /// generation does not know it.
    pub fn command_code(self, command: Command) -> Result<u8, CommandError> {
        let code = match self {
            Self::Legacy => LegacyCommand::from_symbol(command).map(u8::from),
            Self::Current => Some(u8::from(CurrentCommand::from_symbol(command))),
        };

        code.ok_or(CommandError::InvalidCommand { command, set: self })
    }

    pub fn event_code(self, event: EventCode) -> Option<u8> {
        match self {
            Self::Legacy => LegacyEvent::from_symbol(event).map(u8::from),
            Self::Current => Some(u8::from(CurrentEvent::from_symbol(event))),
        }
    }

    pub fn event_for_code(self, code: u8) -> Option<EventCode> {
        match self {
            Self::Legacy => LegacyEvent::try_from(code).ok().map(LegacyEvent::symbol),
            Self::Current => CurrentEvent::try_from(code).ok().map(CurrentEvent::symbol),
        }
    }
}

/// Host-to-device commands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter,
)]
pub enum Command {
    #[strum(serialize = "CMD_PAIR")]
    Pair,
    #[strum(serialize = "CMD_LANDING_PAGE")]
    LandingPage,
    #[strum(serialize = "CMD_GET_LAYER")]
    GetLayer,
    #[strum(serialize = "CMD_LIVE_TRAINING")]
    LiveTraining,
}

/// Device-to-host events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter,
)]
pub enum EventCode {
    #[strum(serialize = "EVT_PAIRED")]
    Paired,
    #[strum(serialize = "EVT_KEYDOWN")]
    KeyDown,
    #[strum(serialize = "EVT_KEYUP")]
    KeyUp,
    #[strum(serialize = "EVT_LAYER")]
    Layer,
    #[strum(serialize = "EVT_LIVE_TRAINING")]
    LiveTraining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("{command} has no code in the {set} command set")]
    InvalidCommand { command: Command, set: CommandSet },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
enum LegacyCommand {
    Pair = 0x00,
    LandingPage = 0x01,
    GetLayer = 0x02,
}

impl LegacyCommand {
    fn from_symbol(command: Command) -> Option<Self> {
        match command {
            Command::Pair => Some(Self::Pair),
            Command::LandingPage => Some(Self::LandingPage),
            Command::GetLayer => Some(Self::GetLayer),
            Command::LiveTraining => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
enum CurrentCommand {
    Pair = 0x00,
    LandingPage = 0x01,
    GetLayer = 0x02,
    LiveTraining = 0x03,
}

impl CurrentCommand {
    fn from_symbol(command: Command) -> Self {
        match command {
            Command::Pair => Self::Pair,
            Command::LandingPage => Self::LandingPage,
            Command::GetLayer => Self::GetLayer,
            Command::LiveTraining => Self::LiveTraining,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum LegacyEvent {
    Paired = 0x00,
    KeyDown = 0x01,
    KeyUp = 0x02,
    Layer = 0x03,
}

impl LegacyEvent {
    fn from_symbol(event: EventCode) -> Option<Self> {
        match event {
            EventCode::Paired => Some(Self::Paired),
            EventCode::KeyDown => Some(Self::KeyDown),
            EventCode::KeyUp => Some(Self::KeyUp),
            EventCode::Layer => Some(Self::Layer),
            EventCode::LiveTraining => None,
        }
    }

    fn symbol(self) -> EventCode {
        match self {
            Self::Paired => EventCode::Paired,
            Self::KeyDown => EventCode::KeyDown,
            Self::KeyUp => EventCode::KeyUp,
            Self::Layer => EventCode::Layer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum CurrentEvent {
    Paired = 0x00,
    Layer = 0x02,
    LiveTraining = 0x03,
    KeyDown = 0x11,
    KeyUp = 0x12,
}

impl CurrentEvent {
    fn from_symbol(event: EventCode) -> Self {
        match event {
            EventCode::Paired => Self::Paired,
            EventCode::KeyDown => Self::KeyDown,
            EventCode::KeyUp => Self::KeyUp,
            EventCode::Layer => Self::Layer,
            EventCode::LiveTraining => Self::LiveTraining,
        }
    }

    fn symbol(self) -> EventCode {
        match self {
            Self::Paired => EventCode::Paired,
            Self::Layer => EventCode::Layer,
            Self::LiveTraining => EventCode::LiveTraining,
            Self::KeyDown => EventCode::KeyDown,
            Self::KeyUp => EventCode::KeyUp,
        }
    }
}
