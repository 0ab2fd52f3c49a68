//! Bridge lifecycle with statum state machine
//!
//! Wires the MQTT handler, the receiver client and both translation
//! directions together and runs them as independent tokio tasks.
//!
//! # State Machine
//!
//! ```text
//! Configured ──► Running ──► Stopped
//!   (start)   (run_until_shutdown)
//! ```
//!
//! # Architecture
//!
//! ```text
//! MqttHandler ─[MqttMessage]→ CommandHandler ─[Request]→ CommandDispatcher ─► DenonClient
//!      ▲                                                                        │
//! MqttPublisher ◄─[Publication]── StatePublisher ◄────────────[StateEvent]──────┘
//! ```

use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::avr::{AvrClient, CommandDispatcher, DenonClient};
use crate::config::BridgeConfig;
use crate::mqtt::message_manager::MqttMessage;
use crate::mqtt::mqtt_handler::{MqttHandler, MqttPublisher};
use crate::translation::{CommandTranslator, StateEvent, StatePublisher};

const COMMAND_CAPACITY: usize = 100;
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// Translates inbound messages and hands the result to the dispatcher
///
/// Each request runs in its own task, so a slow receiver or a toggle waiting
/// for the current mute state never holds up the MQTT event loop.
pub struct CommandHandler<C: AvrClient> {
    translator: CommandTranslator,
    dispatcher: CommandDispatcher<C>,
}

impl<C: AvrClient> CommandHandler<C> {
    pub fn new(translator: CommandTranslator, dispatcher: CommandDispatcher<C>) -> Self {
        Self {
            translator,
            dispatcher,
        }
    }

    /// Returns the dispatch task, if the message produced a request
    pub fn handle(&self, message: &MqttMessage) -> Option<JoinHandle<()>> {
        info!("mqtt {}", message);

        match self.translator.translate(&message.topic, &message.payload) {
            Ok(Some(request)) => {
                info!(" => {:?}", request);
                let dispatcher = self.dispatcher.clone();
                Some(tokio::spawn(async move {
                    if let Err(e) = dispatcher.dispatch(request).await {
                        error!("Failed to send {:?} to receiver: {}", request, e);
                    }
                }))
            }
            Ok(None) => {
                debug!("Ignoring {}, not a command topic", message.topic);
                None
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Configured,
    Running,
    Stopped,
}

#[machine]
pub struct Bridge<S: BridgeState> {
    config: BridgeConfig,
    avr: Arc<DenonClient>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Bridge<Configured> {
    pub fn create(config: BridgeConfig) -> Self {
        info!(
            "Configuring {} bridge for receiver {}:{}",
            config.variant, config.avr.host, config.avr.port
        );
        let avr = Arc::new(DenonClient::new(&config.avr.host, config.avr.port));

        Self::new(config, avr, Vec::new(), CancellationToken::new())
    }

    /// Spawns the MQTT, command, state and reconnect tasks
    pub fn start(mut self) -> Bridge<Running> {
        let variant = self.config.variant;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let handler = MqttHandler::new(self.config.mqtt.clone());
        let publisher = handler.publisher();

        let commands = CommandHandler::new(
            CommandTranslator::new(variant),
            CommandDispatcher::new(self.avr.clone(), variant),
        );
        let states = StatePublisher::new(self.config.mqtt.topic_prefix.clone(), variant);

        // Subscribe before the first connect so no early event is lost.
        let events = self.avr.subscribe();

        self.tasks.push(tokio::spawn(
            handler.run(command_tx, self.shutdown.clone()),
        ));
        self.tasks.push(tokio::spawn(handle_commands(
            command_rx,
            commands,
            self.shutdown.clone(),
        )));
        self.tasks.push(tokio::spawn(forward_state_events(
            events,
            states,
            publisher,
            self.shutdown.clone(),
        )));
        self.tasks.push(tokio::spawn(keep_connected(
            self.avr.clone(),
            self.shutdown.clone(),
        )));

        info!("Bridge running");
        self.transition()
    }
}

impl Bridge<Running> {
    /// Token that stops the bridge when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits for the shutdown token, then for every task to finish
    pub async fn run_until_shutdown(mut self) -> Result<Bridge<Stopped>, BridgeError> {
        self.shutdown.cancelled().await;
        info!("Stopping bridge");

        for task in self.tasks.drain(..) {
            task.await?;
        }

        info!("Bridge stopped");
        Ok(self.transition())
    }
}

async fn handle_commands<C: AvrClient>(
    mut commands: mpsc::Receiver<MqttMessage>,
    handler: CommandHandler<C>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = commands.recv() => match message {
                Some(message) => {
                    handler.handle(&message);
                }
                None => break,
            },
        }
    }
    debug!("Command handler stopped");
}

async fn forward_state_events(
    mut events: broadcast::Receiver<StateEvent>,
    states: StatePublisher,
    publisher: MqttPublisher,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                info!("{} changed to: {:?}", event.name, event.value);
                for publication in states.publications(&event) {
                    if let Err(e) = publisher.publish(publication).await {
                        error!("Failed to publish {} state: {}", event.name, e);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {} receiver events, publishing newer ones", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("State forwarder stopped");
}

/// Keeps the receiver connection up so state events keep flowing between commands
async fn keep_connected<C: AvrClient>(avr: Arc<C>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(RECONNECT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = avr.connect().await {
                    error!("Receiver connection failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avr::dispatcher::tests::{Call, RecordingAvr};
    use crate::translation::{InputSource, MuteState, Variant};

    fn handler(avr: Arc<RecordingAvr>, variant: Variant) -> CommandHandler<RecordingAvr> {
        CommandHandler::new(
            CommandTranslator::new(variant),
            CommandDispatcher::new(avr, variant),
        )
    }

    #[tokio::test]
    async fn dispatches_command_messages() {
        let avr = Arc::new(RecordingAvr::new());
        let handler = handler(avr.clone(), Variant::Generic);

        let task = handler
            .handle(&MqttMessage::from_topic("/home/avr/set/input", "sat"))
            .unwrap();
        task.await.unwrap();

        assert_eq!(
            avr.calls(),
            vec![Call::Connect, Call::Input(InputSource::SatCbl)]
        );
    }

    #[tokio::test]
    async fn toggle_message_reads_mute_state() {
        let avr = Arc::new(RecordingAvr::new());
        let handler = handler(avr.clone(), Variant::Denon);

        let task = handler
            .handle(&MqttMessage::from_topic("avr/set/mute", "toggle"))
            .unwrap();
        task.await.unwrap();

        assert_eq!(
            avr.calls(),
            vec![Call::Connect, Call::QueryMute, Call::Mute(MuteState::On)]
        );
    }

    #[tokio::test]
    async fn drops_unhandled_and_foreign_messages() {
        let avr = Arc::new(RecordingAvr::new());
        let handler = handler(avr.clone(), Variant::Denon);

        assert!(handler
            .handle(&MqttMessage::from_topic("avr/set/treble", "1"))
            .is_none());
        assert!(handler
            .handle(&MqttMessage::from_topic("avr/power", "1"))
            .is_none());
        assert!(handler
            .handle(&MqttMessage::from_topic("avr/set/power", "maybe"))
            .is_none());
        assert!(avr.calls().is_empty());
    }

    #[tokio::test]
    async fn receiver_failure_does_not_stop_handling() {
        let mut avr = RecordingAvr::new();
        avr.reachable = false;
        let avr = Arc::new(avr);
        let handler = handler(avr.clone(), Variant::Generic);

        for payload in ["1", "0"] {
            handler
                .handle(&MqttMessage::from_topic("avr/set/power", payload))
                .unwrap()
                .await
                .unwrap();
        }

        assert_eq!(avr.calls(), vec![Call::Connect, Call::Connect]);
    }

    #[tokio::test]
    async fn command_loop_stops_on_shutdown() {
        let avr = Arc::new(RecordingAvr::new());
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(handle_commands(
            rx,
            handler(avr.clone(), Variant::Generic),
            shutdown.clone(),
        ));

        tx.send(MqttMessage::from_topic("avr/set/volume", "30"))
            .await
            .unwrap();
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_task_connects_immediately() {
        let avr = Arc::new(RecordingAvr::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(keep_connected(avr.clone(), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(avr.calls(), vec![Call::Connect]);
    }
}
