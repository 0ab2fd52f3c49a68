use chrono::NaiveDateTime;
use rumqttc::Publish;
use std::fmt;

/// An inbound MQTT message handed from the event loop to the command side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: NaiveDateTime,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} <{}:{}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload
        )
    }
}

impl MqttMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: chrono::Local::now().naive_local(),
        }
    }

    /// Payloads are decoded lossily; the command vocabulary is plain ASCII.
    pub fn from_publish(publish: &Publish) -> Self {
        Self::from_topic(
            publish.topic.clone(),
            String::from_utf8_lossy(&publish.payload).into_owned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    #[test]
    fn decodes_publish_packets() {
        let publish = Publish::new("avr/set/power", QoS::AtLeastOnce, "1");
        let message = MqttMessage::from_publish(&publish);
        assert_eq!(message.topic, "avr/set/power");
        assert_eq!(message.payload, "1");
        assert!(message.to_string().ends_with("<avr/set/power:1"));
    }
}
