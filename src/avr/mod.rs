//! Receiver side of the bridge
//!
//! The translation layer never talks to the network itself. It hands typed
//! commands to an [`AvrClient`] and receives [`StateEvent`]s from its
//! subscription.
//!
//! ```text
//! avr/
//! ├── denon.rs       - TCP line client for Denon/Marantz style receivers
//! └── dispatcher.rs  - Resolves requests and calls the client
//! ```

pub mod denon;
pub mod dispatcher;

use std::future::Future;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::translation::{InputSource, MuteState, PowerState, StateEvent, Volume};

pub use denon::DenonClient;
pub use dispatcher::CommandDispatcher;

/// Errors raised while talking to the receiver
///
/// None of these stop the bridge. The command that triggered them is dropped.
#[derive(Debug, Error)]
pub enum AvrError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("receiver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected to receiver")]
    NotConnected,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("receiver event channel closed")]
    ChannelClosed,
}

/// Connection to one receiver
///
/// Implementations serialize access to the underlying connection. Callers may
/// issue commands from several tasks without locking.
pub trait AvrClient: Send + Sync + 'static {
    /// Establishes the connection if it is not already up
    fn connect(&self) -> impl Future<Output = Result<(), AvrError>> + Send;

    fn set_power(&self, state: PowerState) -> impl Future<Output = Result<(), AvrError>> + Send;

    /// Main zone power
    fn set_zone1(&self, state: PowerState) -> impl Future<Output = Result<(), AvrError>> + Send;

    fn set_volume(&self, volume: Volume) -> impl Future<Output = Result<(), AvrError>> + Send;

    fn set_mute(&self, state: MuteState) -> impl Future<Output = Result<(), AvrError>> + Send;

    fn set_input(&self, source: InputSource)
        -> impl Future<Output = Result<(), AvrError>> + Send;

    /// Reads the current mute state from the device
    fn query_mute(&self) -> impl Future<Output = Result<MuteState, AvrError>> + Send;

    /// Subscribes to state change events
    fn subscribe(&self) -> broadcast::Receiver<StateEvent>;
}
