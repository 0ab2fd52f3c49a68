use std::sync::Arc;
use tracing::{debug, info};

use super::{AvrClient, AvrError};
use crate::translation::{Command, PowerState, Request, Variant};

/// Sends translated requests to the receiver
///
/// Every dispatch first makes sure the connection is up. A failure at any
/// step is returned to the caller, which logs it and drops the command.
pub struct CommandDispatcher<C: AvrClient> {
    client: Arc<C>,
    variant: Variant,
}

impl<C: AvrClient> Clone for CommandDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            variant: self.variant,
        }
    }
}

impl<C: AvrClient> CommandDispatcher<C> {
    pub fn new(client: Arc<C>, variant: Variant) -> Self {
        Self { client, variant }
    }

    pub async fn dispatch(&self, request: Request) -> Result<(), AvrError> {
        self.client.connect().await?;

        let command = match request {
            Request::Send(command) => command,
            Request::ToggleMute => {
                // Read-then-write; a concurrent mute command can interleave.
                let current = self.client.query_mute().await?;
                info!("Mute is currently {:?}, toggling", current);
                Command::Mute(!current)
            }
        };

        debug!("Dispatching {:?}", command);
        match command {
            Command::Power(PowerState::On) if self.variant.powers_on_via_zone1() => {
                self.client.set_zone1(PowerState::On).await
            }
            Command::Power(state) => self.client.set_power(state).await,
            Command::Volume(volume) => self.client.set_volume(volume).await,
            Command::Mute(state) => self.client.set_mute(state).await,
            Command::Input(source) => self.client.set_input(source).await,
        }
    }
}
