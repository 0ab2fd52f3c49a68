//! Startup configuration from the environment and an optional TOML file
//!
//! Environment variables always win over the file. The file is read from
//! `AVR_BRIDGE_CONFIG` if set, otherwise from
//! `<config dir>/avr-mqtt-bridge/config.toml` when that exists. Keys in the
//! file are the lower-case variable names (`avr_ip = "192.168.1.20"`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::mqtt::config::MqttConfig;
use crate::translation::Variant;

pub const AVR_IP: &str = "AVR_IP";
pub const AVR_PORT: &str = "AVR_PORT";
pub const AVR_VARIANT: &str = "AVR_VARIANT";
pub const TOPIC_PREFIX: &str = "TOPIC_PREFIX";
pub const MQTT_HOST: &str = "MQTT_HOST";
pub const MQTT_PORT: &str = "MQTT_PORT";
pub const MQTT_USER: &str = "MQTT_USER";
pub const MQTT_PASS: &str = "MQTT_PASS";
pub const MQTT_CLIENT_ID: &str = "MQTT_CLIENT_ID";
pub const CONFIG_FILE: &str = "AVR_BRIDGE_CONFIG";

const DEFAULT_AVR_PORT: u16 = 23;
const CONFIG_DIR_NAME: &str = "avr-mqtt-bridge";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Fatal configuration problems, reported before anything connects
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set, not starting")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvrConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub variant: Variant,
    pub avr: AvrConfig,
    pub mqtt: MqttConfig,
}

/// Settings accepted in the TOML file
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub avr_ip: Option<String>,
    pub avr_port: Option<u16>,
    pub avr_variant: Option<Variant>,
    pub topic_prefix: Option<String>,
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
    pub mqtt_client_id: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Value for an environment variable name, rendered as a string
    fn get(&self, var: &str) -> Option<String> {
        match var {
            AVR_IP => self.avr_ip.clone(),
            AVR_PORT => self.avr_port.map(|p| p.to_string()),
            AVR_VARIANT => self.avr_variant.map(|v| v.to_string()),
            TOPIC_PREFIX => self.topic_prefix.clone(),
            MQTT_HOST => self.mqtt_host.clone(),
            MQTT_PORT => self.mqtt_port.map(|p| p.to_string()),
            MQTT_USER => self.mqtt_user.clone(),
            MQTT_PASS => self.mqtt_pass.clone(),
            MQTT_CLIENT_ID => self.mqtt_client_id.clone(),
            _ => None,
        }
    }
}

impl BridgeConfig {
    /// Reads the process environment and the optional config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match config_file_path() {
            Some(path) => {
                info!("Loading configuration file {}", path.display());
                FileConfig::load(&path)?
            }
            None => FileConfig::default(),
        };

        Self::from_lookup(|var| std::env::var(var).ok().or_else(|| file.get(var)))
    }

    /// Builds the configuration from an arbitrary variable lookup
    ///
    /// Required values are checked in the order `AVR_IP`, `AVR_PORT`,
    /// `TOPIC_PREFIX`. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let variant = match get(AVR_VARIANT) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: AVR_VARIANT,
                value,
            })?,
            None => Variant::default(),
        };

        let host = get(AVR_IP).ok_or(ConfigError::Missing(AVR_IP))?;

        let port = match get(AVR_PORT) {
            Some(value) => parse_port(AVR_PORT, value)?,
            None if variant.requires_port() => return Err(ConfigError::Missing(AVR_PORT)),
            None => DEFAULT_AVR_PORT,
        };

        let topic_prefix = get(TOPIC_PREFIX).ok_or(ConfigError::Missing(TOPIC_PREFIX))?;

        let mut mqtt = MqttConfig::new(&topic_prefix);
        if let Some(host) = get(MQTT_HOST) {
            mqtt.host = host;
        }
        if let Some(value) = get(MQTT_PORT) {
            mqtt.port = parse_port(MQTT_PORT, value)?;
        }
        if let Some(client_id) = get(MQTT_CLIENT_ID) {
            mqtt.client_id = client_id;
        }
        if let Some(user) = get(MQTT_USER) {
            mqtt.credentials = Some((user, get(MQTT_PASS).unwrap_or_default()));
        }

        let config = Self {
            variant,
            avr: AvrConfig { host, port },
            mqtt,
        };
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }
}

fn parse_port(var: &'static str, value: String) -> Result<u16, ConfigError> {
    match value.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE) {
        return Some(PathBuf::from(path));
    }
    let mut path = dirs::config_dir()?;
    path.push(CONFIG_DIR_NAME);
    path.push(CONFIG_FILE_NAME);
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn missing_avr_ip_is_fatal() {
        let err = BridgeConfig::from_lookup(lookup(&[(TOPIC_PREFIX, "avr")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(AVR_IP)));
        assert_eq!(err.to_string(), "AVR_IP not set, not starting");
    }

    #[test]
    fn missing_topic_prefix_is_fatal() {
        let err = BridgeConfig::from_lookup(lookup(&[(AVR_IP, "10.0.0.5"), (AVR_PORT, "23")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(TOPIC_PREFIX)));
    }

    #[test]
    fn denon_requires_port() {
        let err = BridgeConfig::from_lookup(lookup(&[
            (AVR_IP, "10.0.0.5"),
            (TOPIC_PREFIX, "avr"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(AVR_PORT)));
    }

    #[test]
    fn generic_defaults_port() {
        let config = BridgeConfig::from_lookup(lookup(&[
            (AVR_IP, "10.0.0.5"),
            (TOPIC_PREFIX, "home/avr/"),
            (AVR_VARIANT, "generic"),
        ]))
        .unwrap();
        assert_eq!(config.variant, Variant::Generic);
        assert_eq!(config.avr.port, 23);
        assert_eq!(config.mqtt.topic_prefix, "home/avr");
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn reads_mqtt_settings() {
        let config = BridgeConfig::from_lookup(lookup(&[
            (AVR_IP, "10.0.0.5"),
            (AVR_PORT, "2323"),
            (TOPIC_PREFIX, "avr"),
            (MQTT_HOST, "broker.lan"),
            (MQTT_PORT, "8883"),
            (MQTT_USER, "bridge"),
            (MQTT_PASS, "secret"),
        ]))
        .unwrap();
        assert_eq!(config.avr.port, 2323);
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(
            config.mqtt.credentials,
            Some(("bridge".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let err = BridgeConfig::from_lookup(lookup(&[
            (AVR_IP, "10.0.0.5"),
            (AVR_PORT, "telnet"),
            (TOPIC_PREFIX, "avr"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: AVR_PORT, .. }));

        let err = BridgeConfig::from_lookup(lookup(&[(AVR_VARIANT, "onkyo")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: AVR_VARIANT, .. }));
    }

    #[test]
    fn file_values_fill_gaps() {
        let file: FileConfig = toml::from_str(
            r#"
            avr_ip = "10.0.0.7"
            avr_variant = "generic"
            topic_prefix = "living/avr"
            mqtt_port = 1884
            "#,
        )
        .unwrap();
        let config = BridgeConfig::from_lookup(|var| {
            if var == TOPIC_PREFIX {
                Some("override".to_string())
            } else {
                file.get(var)
            }
        })
        .unwrap();
        assert_eq!(config.avr.host, "10.0.0.7");
        assert_eq!(config.variant, Variant::Generic);
        assert_eq!(config.mqtt.topic_prefix, "override");
        assert_eq!(config.mqtt.port, 1884);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("avr_host = \"x\"").is_err());
    }
}
