//! Line client for Denon/Marantz receivers
//!
//! Only the fixed command vocabulary of the bridge is covered. Commands and
//! status reports are ASCII lines terminated by `\r`:
//!
//! ```text
//! ──► PWON  PWSTANDBY  ZMON  MVUP  MV505  MUON  MU?  SISAT/CBL
//! ◄── PWON  ZMOFF  MV505  MVMAX 98  MUOFF  SITV  MSSTEREO  DIM BRI  Z2ON
//! ```
//!
//! The socket is opened lazily by [`AvrClient::connect`] and reopened on the
//! next `connect` after the receiver drops it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{AvrClient, AvrError};
use crate::translation::{
    EventName, InputSource, MuteState, PowerState, RawValue, StateEvent, Volume, VolumeStep,
};

const LINE_TERMINATOR: u8 = b'\r';
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_VOLUME: f32 = 98.0;
const EVENT_CAPACITY: usize = 64;

/// Write half of the open socket, tagged so its reader task can tell whether
/// the slot still belongs to it
struct Connection {
    id: u64,
    writer: OwnedWriteHalf,
}

type ConnectionSlot = Arc<Mutex<Option<Connection>>>;

pub struct DenonClient {
    addr: String,
    connection: ConnectionSlot,
    connections: AtomicU64,
    write_timeout: Duration,
    events: broadcast::Sender<StateEvent>,
}

impl DenonClient {
    pub fn new(host: &str, port: u16) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            addr: format!("{}:{}", host, port),
            connection: Arc::new(Mutex::new(None)),
            connections: AtomicU64::new(0),
            write_timeout: WRITE_TIMEOUT,
            events,
        }
    }

    /// Writes one command line
    ///
    /// A failed or stalled write drops the connection, so the next `connect`
    /// opens a fresh socket.
    async fn send_line(&self, line: String) -> Result<(), AvrError> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(AvrError::NotConnected)?;

        debug!("avr > {}", line);
        let mut bytes = line.into_bytes();
        bytes.push(LINE_TERMINATOR);

        let write = connection.writer.write_all(&bytes);
        let result = match timeout(self.write_timeout, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => AvrError::Io(e),
            Err(_) => AvrError::Timeout(format!("write to {}", self.addr)),
        };
        warn!("Write to receiver failed, dropping connection: {}", result);
        *guard = None;
        Err(result)
    }
}

impl AvrClient for DenonClient {
    async fn connect(&self) -> Result<(), AvrError> {
        let mut guard = self.connection.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!("Connecting to receiver at {}", self.addr);
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(AvrError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(AvrError::Timeout(format!("connection to {}", self.addr))),
        };

        let id = self.connections.fetch_add(1, Ordering::Relaxed);
        let (read_half, writer) = stream.into_split();
        *guard = Some(Connection { id, writer });

        tokio::spawn(read_status_lines(
            id,
            read_half,
            self.events.clone(),
            self.connection.clone(),
        ));

        info!("Connected to receiver at {}", self.addr);
        Ok(())
    }

    async fn set_power(&self, state: PowerState) -> Result<(), AvrError> {
        self.send_line(power_line(state)).await
    }

    async fn set_zone1(&self, state: PowerState) -> Result<(), AvrError> {
        self.send_line(zone1_line(state)).await
    }

    async fn set_volume(&self, volume: Volume) -> Result<(), AvrError> {
        self.send_line(volume_line(volume)).await
    }

    async fn set_mute(&self, state: MuteState) -> Result<(), AvrError> {
        self.send_line(mute_line(state)).await
    }

    async fn set_input(&self, source: InputSource) -> Result<(), AvrError> {
        self.send_line(format!("SI{}", source.code())).await
    }

    async fn query_mute(&self) -> Result<MuteState, AvrError> {
        // Subscribe first so the reply cannot slip past us.
        let mut events = self.events.subscribe();
        self.send_line("MU?".to_string()).await?;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(StateEvent {
                        name: EventName::Mute,
                        value,
                    }) => return Ok(mute_state(&value)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Skipped {} receiver events while waiting for mute", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AvrError::ChannelClosed)
                    }
                }
            }
        };

        timeout(QUERY_TIMEOUT, wait)
            .await
            .map_err(|_| AvrError::Timeout("mute status".to_string()))?
    }

    fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }
}

async fn read_status_lines(
    id: u64,
    read_half: OwnedReadHalf,
    events: broadcast::Sender<StateEvent>,
    connection: ConnectionSlot,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(LINE_TERMINATOR, &mut buf).await {
            Ok(0) => {
                warn!("Receiver closed the connection");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                debug!("avr < {}", line);
                if let Some(event) = parse_status(line) {
                    // No subscribers is fine; the event is simply not needed.
                    let _ = events.send(event);
                }
            }
            Err(e) => {
                error!("Failed to read from receiver: {}", e);
                break;
            }
        }
    }

    // A newer connection may already own the slot.
    let mut guard = connection.lock().await;
    if guard.as_ref().is_some_and(|current| current.id == id) {
        *guard = None;
    }
}

fn power_line(state: PowerState) -> String {
    match state {
        PowerState::On => "PWON".to_string(),
        PowerState::Standby => "PWSTANDBY".to_string(),
    }
}

fn zone1_line(state: PowerState) -> String {
    match state {
        PowerState::On => "ZMON".to_string(),
        PowerState::Standby => "ZMOFF".to_string(),
    }
}

fn mute_line(state: MuteState) -> String {
    match state {
        MuteState::On => "MUON".to_string(),
        MuteState::Off => "MUOFF".to_string(),
    }
}

/// Master volume uses two digits per step plus a trailing `5` for half steps
fn volume_line(volume: Volume) -> String {
    match volume {
        Volume::Step(VolumeStep::Up) => "MVUP".to_string(),
        Volume::Step(VolumeStep::Down) => "MVDOWN".to_string(),
        Volume::Level(level) => {
            let half_steps = (level.clamp(0.0, MAX_VOLUME) * 2.0).round() as u32;
            if half_steps % 2 == 1 {
                format!("MV{:02}5", half_steps / 2)
            } else {
                format!("MV{:02}", half_steps / 2)
            }
        }
    }
}

fn parse_volume(digits: &str) -> RawValue {
    let digits = digits.trim();
    let parsed = match digits.len() {
        2 => digits.parse::<u32>().ok().map(f64::from),
        3 if digits.ends_with('5') => digits[..2].parse::<u32>().ok().map(|v| f64::from(v) + 0.5),
        _ => None,
    };
    match parsed {
        Some(level) => RawValue::Number(level),
        None => RawValue::Text(digits.to_string()),
    }
}

fn zone_switch(name: EventName, rest: &str) -> Option<StateEvent> {
    matches!(rest, "ON" | "OFF").then(|| StateEvent::new(name, rest))
}

fn mute_state(value: &RawValue) -> MuteState {
    match value {
        RawValue::Text(s) if s == "OFF" => MuteState::Off,
        RawValue::Bool(false) => MuteState::Off,
        _ => MuteState::On,
    }
}

/// Parses one status line into a state event
///
/// Lines outside the bridge's vocabulary (zone volumes, tuner presets, ...)
/// are ignored.
fn parse_status(line: &str) -> Option<StateEvent> {
    if let Some(rest) = line.strip_prefix("MVMAX") {
        return Some(StateEvent::new(EventName::MaxVolume, parse_volume(rest)));
    }
    if let Some(rest) = line.strip_prefix("MV") {
        return Some(StateEvent::new(EventName::Volume, parse_volume(rest)));
    }
    if let Some(rest) = line.strip_prefix("DIM ") {
        return Some(StateEvent::new(EventName::Dim, rest.trim()));
    }

    let (code, rest) = (line.get(..2)?, line.get(2..)?);
    match code {
        "PW" => Some(StateEvent::new(EventName::Power, rest)),
        "ZM" => Some(StateEvent::new(EventName::Zone1, rest)),
        "Z2" => zone_switch(EventName::Zone2, rest),
        "Z3" => zone_switch(EventName::Zone3, rest),
        "MU" => Some(StateEvent::new(EventName::Mute, rest)),
        "SI" => Some(StateEvent::new(EventName::Input, rest)),
        "MS" => Some(StateEvent::new(EventName::Surround, rest)),
        _ => None,
    }
}
