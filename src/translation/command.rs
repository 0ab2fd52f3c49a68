//! Inbound direction: MQTT command topics to typed receiver commands
//!
//! Command topics have the shape `[<prefix>]/set/<surface>` with a bare string
//! payload. Only the two trailing segments are inspected, so the prefix may
//! contain any number of levels.
//!
//! ```text
//! home/avr/set/power  "1"      ──► Send(Power(On))
//! home/avr/set/input  "cbl"    ──► Send(Input(SatCbl))
//! home/avr/set/mute   "toggle" ──► ToggleMute
//! home/avr/status              ──► nothing
//! ```

use std::fmt::{self, Display};
use std::ops::Not;

use super::error::TranslateError;
use super::variant::{Variant, Vocabulary, VolumeMode};

const SET_SEGMENT: &str = "set";
const TOGGLE_TOKEN: &str = "toggle";

/// Controllable capabilities of the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Power,
    Volume,
    Mute,
    Input,
}

impl Surface {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "power" => Some(Surface::Power),
            "volume" => Some(Surface::Volume),
            "mute" => Some(Surface::Mute),
            "input" => Some(Surface::Input),
            _ => None,
        }
    }
}

impl Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Power => write!(f, "power"),
            Surface::Volume => write!(f, "volume"),
            Surface::Mute => write!(f, "mute"),
            Surface::Input => write!(f, "input"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Standby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteState {
    On,
    Off,
}

impl Not for MuteState {
    type Output = MuteState;

    fn not(self) -> Self::Output {
        match self {
            MuteState::On => MuteState::Off,
            MuteState::Off => MuteState::On,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

/// Requested volume change
///
/// Absolute levels and relative steps are distinct requests. Which one a
/// payload produces depends on the configured [`VolumeMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Volume {
    Level(f32),
    Step(VolumeStep),
}

/// Input sources the receiver can be switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSource {
    Cd,
    Tuner,
    Dvd,
    Bd,
    Tv,
    /// Combined satellite/cable input
    SatCbl,
    MediaPlayer,
    Game,
    Aux1,
    Net,
    Usb,
    IPod,
    Vdp,
    MxPort,
}

impl InputSource {
    /// Canonical upper-case source code sent to the receiver
    pub fn code(self) -> &'static str {
        match self {
            InputSource::Cd => "CD",
            InputSource::Tuner => "TUNER",
            InputSource::Dvd => "DVD",
            InputSource::Bd => "BD",
            InputSource::Tv => "TV",
            InputSource::SatCbl => "SAT/CBL",
            InputSource::MediaPlayer => "MPLAY",
            InputSource::Game => "GAME",
            InputSource::Aux1 => "AUX1",
            InputSource::Net => "NET",
            InputSource::Usb => "USB",
            InputSource::IPod => "IPOD",
            InputSource::Vdp => "VDP",
            InputSource::MxPort => "MXPORT",
        }
    }

    /// Case-folds a raw token and collapses synonyms onto one source
    pub fn normalize(raw: &str) -> Option<Self> {
        let source = match raw.trim().to_ascii_uppercase().as_str() {
            "CD" => InputSource::Cd,
            "TUNER" => InputSource::Tuner,
            "DVD" => InputSource::Dvd,
            "BD" => InputSource::Bd,
            "TV" => InputSource::Tv,
            "SAT" | "CBL" | "SAT/CBL" | "CABLE" | "SATELLITE" | "SATTELITE" => {
                InputSource::SatCbl
            }
            "MPLAY" | "MEDIA" | "MEDIAPLAYER" => InputSource::MediaPlayer,
            "GAME" => InputSource::Game,
            "AUX1" => InputSource::Aux1,
            "NET" => InputSource::Net,
            "USB" => InputSource::Usb,
            "IPOD" => InputSource::IPod,
            "VDP" => InputSource::Vdp,
            "MXPORT" => InputSource::MxPort,
            _ => return None,
        };
        Some(source)
    }
}

impl Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A normalized command ready for dispatch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Power(PowerState),
    Volume(Volume),
    Mute(MuteState),
    Input(InputSource),
}

/// Outcome of translating one command message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    /// Send the command as is
    Send(Command),
    /// Read the current mute state and send its inverse
    ToggleMute,
}

/// Translates command topics into [`Request`]s for one receiver variant
///
/// Translation is a pure function of topic and payload. The only request that
/// needs device state, [`Request::ToggleMute`], is resolved by the dispatcher.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    variant: Variant,
}

impl CommandTranslator {
    pub fn new(variant: Variant) -> Self {
        Self { variant }
    }

    /// Translates a command message
    ///
    /// # Returns
    ///
    /// * `Ok(Some(request))` - the message is a command for a known surface
    /// * `Ok(None)` - the topic is outside the `set` namespace or too short
    /// * `Err(TranslateError)` - the message was meant as a command but could
    ///   not be understood
    pub fn translate(
        &self,
        topic: &str,
        payload: &str,
    ) -> Result<Option<Request>, TranslateError> {
        let path = topic.strip_prefix('/').unwrap_or(topic);
        let segments: Vec<&str> = path.split('/').collect();

        let [.., namespace, last] = segments.as_slice() else {
            return Ok(None);
        };
        if *namespace != SET_SEGMENT {
            return Ok(None);
        }

        let Some(surface) = Surface::from_segment(last) else {
            return Err(TranslateError::Unhandled {
                topic: topic.to_string(),
            });
        };

        let payload = payload.trim();
        let request = match surface {
            Surface::Power => Request::Send(Command::Power(self.power(payload)?)),
            Surface::Volume => Request::Send(Command::Volume(self.volume(payload)?)),
            Surface::Mute => self.mute(payload)?,
            Surface::Input => {
                let source = InputSource::normalize(payload)
                    .ok_or_else(|| unknown(Surface::Input, payload))?;
                Request::Send(Command::Input(source))
            }
        };
        Ok(Some(request))
    }

    fn power(&self, payload: &str) -> Result<PowerState, TranslateError> {
        match (self.variant.vocabulary(), payload) {
            (_, "0") => Ok(PowerState::Standby),
            (Vocabulary::Lenient, _) | (Vocabulary::Strict, "1") => Ok(PowerState::On),
            (Vocabulary::Strict, _) => Err(unknown(Surface::Power, payload)),
        }
    }

    fn volume(&self, payload: &str) -> Result<Volume, TranslateError> {
        match self.variant.volume_mode() {
            VolumeMode::Relative => match payload.to_ascii_lowercase().as_str() {
                "up" => Ok(Volume::Step(VolumeStep::Up)),
                "down" => Ok(Volume::Step(VolumeStep::Down)),
                _ => Err(unknown(Surface::Volume, payload)),
            },
            VolumeMode::Absolute => {
                let level: f32 = payload.parse().map_err(|e| TranslateError::Validation {
                    surface: Surface::Volume,
                    payload: payload.to_string(),
                    reason: format!("{}", e),
                })?;
                if !level.is_finite() || level < 0.0 {
                    return Err(TranslateError::Validation {
                        surface: Surface::Volume,
                        payload: payload.to_string(),
                        reason: "level must be a non-negative number".to_string(),
                    });
                }
                Ok(Volume::Level(level))
            }
        }
    }

    fn mute(&self, payload: &str) -> Result<Request, TranslateError> {
        if payload.eq_ignore_ascii_case(TOGGLE_TOKEN) {
            return Ok(Request::ToggleMute);
        }
        let state = match (self.variant.vocabulary(), payload) {
            (_, "0") => MuteState::Off,
            (Vocabulary::Strict, "mute_off") => MuteState::Off,
            (Vocabulary::Strict, "1" | "mute_on") => MuteState::On,
            (Vocabulary::Lenient, _) => MuteState::On,
            (Vocabulary::Strict, _) => return Err(unknown(Surface::Mute, payload)),
        };
        Ok(Request::Send(Command::Mute(state)))
    }
}

fn unknown(surface: Surface, payload: &str) -> TranslateError {
    TranslateError::UnknownValue {
        surface,
        payload: payload.to_string(),
    }
}
