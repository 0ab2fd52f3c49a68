//! # MQTT side of the bridge
//!
//! Wraps a `rumqttc` client and event loop. The handler owns the event loop,
//! keeps the command subscription alive across reconnects and forwards every
//! inbound publish to the command side. Outbound state publications go through
//! a cheap, clonable [`MqttPublisher`](mqtt_handler::MqttPublisher).
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and the command topic filter
//! ├── message_manager.rs  - Inbound message representation
//! └── mqtt_handler.rs     - Event loop, subscription and publishing
//! ```

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
