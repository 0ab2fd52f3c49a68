use std::fmt;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "avr-mqtt-bridge";

#[derive(Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    /// Topic prefix without trailing slash, e.g. `home/livingroom/avr`
    pub topic_prefix: String,
    pub keep_alive: Duration,
    /// Pause between event loop errors before polling again
    pub retry_delay: Duration,
}

impl MqttConfig {
    pub fn new(topic_prefix: &str) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            credentials: None,
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
            keep_alive: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Filter covering every command topic
    pub fn command_filter(&self) -> String {
        format!("{}/set/#", self.topic_prefix)
    }
}

// Hand-written so the password never ends up in the logs.
impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("user", &self.credentials.as_ref().map(|(user, _)| user))
            .field("topic_prefix", &self.topic_prefix)
            .field("keep_alive", &self.keep_alive)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_filter_uses_prefix() {
        assert_eq!(MqttConfig::new("home/avr/").command_filter(), "home/avr/set/#");
    }

    #[test]
    fn debug_hides_password() {
        let mut config = MqttConfig::new("avr");
        config.credentials = Some(("bridge".to_string(), "hunter2".to_string()));
        let printed = format!("{:?}", config);
        assert!(printed.contains("bridge"));
        assert!(!printed.contains("hunter2"));
    }
}
