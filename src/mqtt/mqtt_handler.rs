use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::MqttMessage;
use crate::translation::Publication;

const REQUEST_CAPACITY: usize = 100;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

/// Clonable handle for outbound publications
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub async fn publish(&self, publication: Publication) -> Result<(), ClientError> {
        debug!(
            "mqtt > {}:{} (qos {:?}, retain {})",
            publication.topic, publication.payload, publication.qos, publication.retain
        );
        self.client
            .publish(
                publication.topic,
                publication.qos,
                publication.retain,
                publication.payload.into_bytes(),
            )
            .await
    }
}

/// Owns the MQTT event loop
///
/// Reconnecting is left to `rumqttc`: after an error the next `poll` dials the
/// broker again. The command subscription is renewed on every `ConnAck`.
pub struct MqttHandler {
    status: MqttStatus,
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
}

impl MqttHandler {
    pub fn new(config: MqttConfig) -> Self {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
        mqtt_options.set_keep_alive(config.keep_alive);
        if let Some((user, pass)) = &config.credentials {
            mqtt_options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        MqttHandler {
            status: MqttStatus::default(),
            client,
            eventloop,
            config,
        }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    pub fn status(&self) -> &MqttStatus {
        &self.status
    }

    /// Polls the event loop until shutdown, forwarding inbound publishes
    pub async fn run(mut self, inbound: mpsc::Sender<MqttMessage>, shutdown: CancellationToken) {
        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.host, self.config.port
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, disconnecting from MQTT broker");
                    // The request queue may be full; never wait on it here.
                    if let Err(e) = self.client.try_disconnect() {
                        debug!("Disconnect request failed: {}", e);
                    }
                    break;
                }

                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        self.status.connection_state = ConnectionState::Connected;
                        tokio::spawn(subscribe(self.client.clone(), self.config.command_filter()));
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.status.messages_received += 1;
                        self.status.last_activity = Some(chrono::Local::now());
                        let message = MqttMessage::from_publish(&publish);
                        if inbound.send(message).await.is_err() {
                            warn!("Command channel closed, stopping MQTT handler");
                            break;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                        self.status.messages_sent += 1;
                        self.status.last_activity = Some(chrono::Local::now());
                    }
                    Ok(other) => debug!("MQTT event: {:?}", other),
                    Err(e) => {
                        if self.status.connection_state == ConnectionState::Connected {
                            error!("mqtt disconnected: {}", e);
                        } else {
                            error!("mqtt: {}", e);
                        }
                        self.status.connection_state = ConnectionState::Reconnecting;

                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.config.retry_delay) => {}
                        }
                    }
                },
            }
        }

        self.status.connection_state = ConnectionState::Disconnected;
        info!(
            "MQTT handler stopped ({} received, {} sent)",
            self.status.messages_received, self.status.messages_sent
        );
    }

}

/// Queues the command subscription
///
/// Runs beside the event loop: with a full request queue the subscription
/// only fits once `poll` has drained it.
async fn subscribe(client: AsyncClient, filter: String) {
    info!("mqtt subscribe: {}", filter);
    if let Err(e) = client.subscribe(&filter, QoS::AtLeastOnce).await {
        error!("Failed to subscribe to {}: {}", filter, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CONNECT: u8 = 1;
    const PUBLISH: u8 = 3;
    const SUBSCRIBE: u8 = 8;
    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// Reads one control packet, returning its type and body
    async fn read_packet(socket: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = socket.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = socket.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        socket.read_exact(&mut body).await?;
        Ok((header >> 4, body))
    }

    /// Topic filter and requested QoS of a SUBSCRIBE body
    fn subscription(body: &[u8]) -> (String, u8) {
        let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
        let filter = String::from_utf8(body[4..4 + len].to_vec()).unwrap();
        (filter, body[4 + len])
    }

    fn suback(body: &[u8]) -> [u8; 5] {
        [0x90, 0x03, body[0], body[1], 0x01]
    }

    fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload.as_bytes());
        packet
    }

    async fn accept_session(listener: &TcpListener) -> TcpStream {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (kind, _) = read_packet(&mut socket).await.unwrap();
        assert_eq!(kind, CONNECT);
        socket.write_all(&CONNACK).await.unwrap();
        socket
    }

    async fn local_broker() -> (TcpListener, MqttConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = MqttConfig::new("avr");
        config.host = "127.0.0.1".to_string();
        config.port = listener.local_addr().unwrap().port();
        config.retry_delay = Duration::from_millis(100);
        (listener, config)
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let mut config = MqttConfig::new("avr");
        config.port = 1;
        let handler = MqttHandler::new(config);
        assert_eq!(handler.status().connection_state, ConnectionState::Disconnected);

        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(10), handler.run(tx, shutdown))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribes_and_forwards_commands() {
        let (listener, config) = local_broker().await;

        let broker = tokio::spawn(async move {
            let mut socket = accept_session(&listener).await;
            let (kind, body) = read_packet(&mut socket).await.unwrap();
            assert_eq!(kind, SUBSCRIBE);
            socket.write_all(&suback(&body)).await.unwrap();
            socket
                .write_all(&publish_packet("avr/set/power", "1"))
                .await
                .unwrap();
            (subscription(&body), socket)
        });

        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handler = tokio::spawn(MqttHandler::new(config).run(tx, shutdown.clone()));

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, "avr/set/power");
        assert_eq!(message.payload, "1");

        let ((filter, qos), _socket) = broker.await.unwrap();
        assert_eq!(filter, "avr/set/#");
        assert_eq!(qos, 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handler)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn subscribes_when_request_queue_is_full() {
        let (listener, config) = local_broker().await;
        let handler = MqttHandler::new(config);

        // States published while the broker was unreachable.
        let mut queued = 0;
        while handler
            .client
            .try_publish("avr/volume", QoS::AtMostOnce, true, "40")
            .is_ok()
        {
            queued += 1;
        }
        assert_eq!(queued, REQUEST_CAPACITY);

        let broker = tokio::spawn(async move {
            let mut socket = accept_session(&listener).await;
            let mut publishes = 0;
            loop {
                let (kind, body) = read_packet(&mut socket).await.unwrap();
                match kind {
                    PUBLISH => publishes += 1,
                    SUBSCRIBE => return (publishes, subscription(&body), socket),
                    _ => {}
                }
            }
        });

        let (tx, _rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(handler.run(tx, shutdown.clone()));

        let (publishes, (filter, _), _socket) =
            tokio::time::timeout(Duration::from_secs(5), broker)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(publishes, queued);
        assert_eq!(filter, "avr/set/#");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
