//! Outbound direction: receiver state events to retained MQTT publications

use rumqttc::QoS;
use std::fmt::{self, Display};

use super::variant::Variant;

/// Names of the state events a receiver reports
///
/// Discriminants follow the order of [`EventName::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Power,
    Volume,
    Mute,
    Input,
    Zone1,
    Zone2,
    Zone3,
    Surround,
    Dim,
    MaxVolume,
}

impl EventName {
    pub const ALL: [EventName; 10] = [
        EventName::Power,
        EventName::Volume,
        EventName::Mute,
        EventName::Input,
        EventName::Zone1,
        EventName::Zone2,
        EventName::Zone3,
        EventName::Surround,
        EventName::Dim,
        EventName::MaxVolume,
    ];

    /// Topic level the event is published under
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Power => "power",
            EventName::Volume => "volume",
            EventName::Mute => "mute",
            EventName::Input => "input",
            EventName::Zone1 => "zone1",
            EventName::Zone2 => "zone2",
            EventName::Zone3 => "zone3",
            EventName::Surround => "surround",
            EventName::Dim => "dim",
            EventName::MaxVolume => "max_volume",
        }
    }
}

impl Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried by a state event, as reported by the receiver
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Absent,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RawValue::Absent, Into::into)
    }
}

/// An immutable state change reported by the receiver
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub name: EventName,
    pub value: RawValue,
}

impl StateEvent {
    pub fn new(name: EventName, value: impl Into<RawValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A message ready to be handed to the MQTT client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Maps a raw value to its published form
///
/// The ON/OFF table is applied before lower-casing, so `"ON"` becomes `"1"`
/// while an unlisted `"Dolby"` becomes `"dolby"`. Matching is exact-case.
pub fn canonicalize(value: &RawValue) -> String {
    let text = match value {
        RawValue::Absent => "0".to_string(),
        RawValue::Bool(false) => "0".to_string(),
        RawValue::Bool(true) => "1".to_string(),
        RawValue::Number(n) => n.to_string(),
        RawValue::Text(s) => match s.as_str() {
            "OFF" | "STANDBY" => "0".to_string(),
            "ON" => "1".to_string(),
            other => other.to_string(),
        },
    };
    text.to_lowercase()
}

/// Turns state events into retained, at-least-once publications
#[derive(Debug, Clone)]
pub struct StatePublisher {
    prefix: String,
    variant: Variant,
}

impl StatePublisher {
    pub fn new(prefix: impl Into<String>, variant: Variant) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            variant,
        }
    }

    pub fn topic_for(&self, name: EventName) -> String {
        format!("{}/{}", self.prefix, name)
    }

    /// Publications for one event, one per fan-out topic
    ///
    /// Events the variant does not republish yield nothing.
    pub fn publications(&self, event: &StateEvent) -> Vec<Publication> {
        let payload = canonicalize(&event.value);
        self.variant
            .fan_out(event.name)
            .iter()
            .map(|name| Publication {
                topic: self.topic_for(*name),
                payload: payload.clone(),
                qos: QoS::AtLeastOnce,
                retain: true,
            })
            .collect()
    }
}
