//! Error definitions for the translation layer

use thiserror::Error;

use super::command::Surface;

/// Reasons an inbound command message did not produce a command
///
/// None of these are fatal. The bridge logs them and drops the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// The topic is in the command namespace but names no known surface
    #[error("unhandled request: {topic}")]
    Unhandled { topic: String },

    /// The surface is known but the payload is not part of its vocabulary
    #[error("unhandled {surface} value: {payload:?}")]
    UnknownValue { surface: Surface, payload: String },

    /// The payload could not be parsed into the value the surface expects
    #[error("invalid {surface} value {payload:?}: {reason}")]
    Validation {
        surface: Surface,
        payload: String,
        reason: String,
    },
}
