//! Receiver variants and the per-variant translation tables

use serde::Deserialize;
use std::fmt::{self, Display};
use std::str::FromStr;

use super::state::EventName;

/// Supported receiver flavours
///
/// The variants differ in how payloads are interpreted and which state
/// events are republished, so they are selected explicitly instead of being
/// guessed from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Denon telnet control: relative volume, strict `1`/`0` vocabulary
    #[default]
    Denon,
    /// Absolute volume levels, lenient vocabulary, zone fan-out
    Generic,
}

/// How a `volume` payload is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMode {
    /// `up` / `down` steps
    Relative,
    /// Numeric master volume level
    Absolute,
}

/// How `power` and `mute` payloads are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    /// Only the documented tokens are accepted
    Strict,
    /// `"0"` is off, everything else is on
    Lenient,
}

const DENON_EVENTS: &[EventName] = &[
    EventName::Power,
    EventName::Volume,
    EventName::Mute,
    EventName::Input,
];

// Ordered by discriminant so single-topic lookups can index into it.
const GENERIC_EVENTS: &[EventName] = &EventName::ALL;

const POWER_FAN_OUT: &[EventName] = &[EventName::Power, EventName::Zone1];

impl Variant {
    pub fn volume_mode(self) -> VolumeMode {
        match self {
            Variant::Denon => VolumeMode::Relative,
            Variant::Generic => VolumeMode::Absolute,
        }
    }

    pub fn vocabulary(self) -> Vocabulary {
        match self {
            Variant::Denon => Vocabulary::Strict,
            Variant::Generic => Vocabulary::Lenient,
        }
    }

    /// Whether `AVR_PORT` must be configured explicitly
    pub fn requires_port(self) -> bool {
        matches!(self, Variant::Denon)
    }

    /// Whether power-on is sent to the main zone instead of the power surface
    pub fn powers_on_via_zone1(self) -> bool {
        matches!(self, Variant::Denon)
    }

    /// State events this variant republishes
    pub fn events(self) -> &'static [EventName] {
        match self {
            Variant::Denon => DENON_EVENTS,
            Variant::Generic => GENERIC_EVENTS,
        }
    }

    /// Topics a state event is published under, in publish order
    ///
    /// Returns an empty slice for events the variant does not republish.
    pub fn fan_out(self, name: EventName) -> &'static [EventName] {
        if !self.events().contains(&name) {
            return &[];
        }
        match (self, name) {
            (Variant::Generic, EventName::Power) => POWER_FAN_OUT,
            _ => {
                let idx = name as usize;
                &GENERIC_EVENTS[idx..=idx]
            }
        }
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Denon => write!(f, "denon"),
            Variant::Generic => write!(f, "generic"),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "denon" => Ok(Variant::Denon),
            "generic" => Ok(Variant::Generic),
            other => Err(format!("unknown variant '{}'", other)),
        }
    }
}
