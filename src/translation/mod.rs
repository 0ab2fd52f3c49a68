//! Bidirectional translation between MQTT topics and receiver commands/events
//!
//! Both directions are stateless and free of I/O:
//!
//! ```text
//! <prefix>/set/<surface> + payload ──► CommandTranslator ──► Request
//! StateEvent(name, value)          ──► StatePublisher    ──► Publication(s)
//! ```
//!
//! The tables that differ between receiver flavours live in [`variant`].

pub mod command;
pub mod error;
pub mod state;
pub mod variant;

pub use command::{
    Command, CommandTranslator, InputSource, MuteState, PowerState, Request, Surface, Volume,
    VolumeStep,
};
pub use error::TranslateError;
pub use state::{canonicalize, EventName, Publication, RawValue, StateEvent, StatePublisher};
pub use variant::Variant;
