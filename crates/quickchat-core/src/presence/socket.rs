//! Socket.IO presence channel over `tokio-tungstenite`.
//!
//! Each opened channel runs in its own task: connect, Engine.IO handshake,
//! namespace connect, then answer heartbeats and forward roster and other
//! server events until closed. Lost connections are retried with exponential backoff the way a
//! Socket.IO client reconnects natively; a refusal or a server-side
//! disconnect ends the channel.

use std::time::Duration;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::{Config, PresenceConfig};

use super::packet::{OpenInfo, Packet};
use super::{
    ChannelId, PresenceConnection, PresenceConnector, PresenceError, PresenceEvent,
    PresenceHandle, ServerEvent, EVENT_BUFFER_SIZE,
};

/// Server event carrying the online roster
pub const ROSTER_EVENT: &str = "getOnlineUsers";

/// Query parameter the server reads the user identity from
const IDENTITY_PARAM: &str = "userId";

/// Time allowed for the TCP/websocket connect plus Engine.IO handshake.
/// Matches the Socket.IO client's default connect timeout.
const CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Randomization applied to each reconnect delay (±50%)
const RECONNECT_JITTER: f64 = 0.5;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Opens Socket.IO presence channels against one backend
#[derive(Debug, Clone)]
pub struct SocketConnector {
    base: url::Url,
    config: PresenceConfig,
}

impl SocketConnector {
    /// `base` is the websocket origin (`ws://` or `wss://`) of the backend
    pub fn new(base: url::Url, config: PresenceConfig) -> Self {
        Self { base, config }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.socket_url()?, config.presence.clone()))
    }

    /// Full websocket URL for one identity
    pub fn endpoint(&self, identity: &str) -> url::Url {
        let mut url = self.base.clone();
        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket")
            .append_pair(IDENTITY_PARAM, identity);
        url
    }
}

impl PresenceConnector for SocketConnector {
    fn open(&self, identity: &str) -> Result<PresenceConnection, PresenceError> {
        if identity.is_empty() {
            return Err(PresenceError::InvalidEndpoint("empty identity".to_string()));
        }

        let id = ChannelId::next();
        let url = self.endpoint(identity);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        debug!(channel = %id, url = %url, "Opening presence channel");
        let task = tokio::spawn(run_channel(
            id,
            url.to_string(),
            self.config.clone(),
            events_tx,
            shutdown_rx,
        ));

        Ok(PresenceConnection {
            handle: Box::new(SocketHandle {
                id,
                identity: identity.to_string(),
                shutdown: shutdown_tx,
                task,
            }),
            events: events_rx,
        })
    }
}

/// Handle to a running channel task. Dropping it closes the channel.
pub struct SocketHandle {
    id: ChannelId,
    identity: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PresenceHandle for SocketHandle {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn close(&self) {
        // Errors only when the task already exited
        let _ = self.shutdown.send(true);
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.task.is_finished()
    }
}

/// How one connection attempt ended
#[derive(Debug)]
enum Exit {
    /// Closed from our side
    Closed,
    /// Nobody listens for events anymore
    Abandoned,
    /// Server refused or disconnected us; do not retry
    Final(String),
    /// Transport failure; retry
    Lost(PresenceError),
}

async fn run_channel(
    id: ChannelId,
    url: String,
    config: PresenceConfig,
    events: mpsc::Sender<PresenceEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        let exit = connect_and_run(id, &url, &events, &mut shutdown, &mut failures).await;

        match exit {
            Exit::Closed | Exit::Abandoned => {
                debug!(channel = %id, ?exit, "Presence channel stopped");
                return;
            }
            Exit::Final(reason) => {
                info!(channel = %id, reason = %reason, "Presence channel ended by server");
                let _ = events.send(PresenceEvent::Disconnected { reason }).await;
                return;
            }
            Exit::Lost(err) => {
                warn!(channel = %id, error = %err, "Presence connection failed");
                if events
                    .send(PresenceEvent::ConnectError(err.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        failures += 1;
        if config.reconnect_attempts > 0 && failures > config.reconnect_attempts {
            let reason = format!("gave up after {} reconnect attempts", config.reconnect_attempts);
            warn!(channel = %id, "Presence channel {}", reason);
            let _ = events.send(PresenceEvent::Disconnected { reason }).await;
            return;
        }

        let delay = reconnect_delay(&config, failures);
        debug!(channel = %id, attempt = failures, delay_ms = delay.as_millis() as u64, "Reconnecting presence channel");
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)`, capped, ±50%
fn reconnect_delay(config: &PresenceConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = config
        .reconnect_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.reconnect_delay_max_ms.max(config.reconnect_delay_ms));
    let jitter = rand::thread_rng().gen_range(-RECONNECT_JITTER..=RECONNECT_JITTER);
    let ms = (base as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(ms)
}

async fn connect_and_run(
    id: ChannelId,
    url: &str,
    events: &mpsc::Sender<PresenceEvent>,
    shutdown: &mut watch::Receiver<bool>,
    failures: &mut u32,
) -> Exit {
    let connect = tokio::time::timeout(
        Duration::from_millis(CONNECT_TIMEOUT_MS),
        tokio_tungstenite::connect_async(url),
    );
    let ws = tokio::select! {
        _ = shutdown.changed() => return Exit::Closed,
        result = connect => match result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Exit::Lost(PresenceError::Connect(e)),
            Err(_) => return Exit::Lost(PresenceError::Timeout),
        },
    };
    debug!(channel = %id, "Websocket connected");

    run_session(id, ws, events, shutdown, failures).await
}

async fn run_session(
    id: ChannelId,
    ws: WsStream,
    events: &mpsc::Sender<PresenceEvent>,
    shutdown: &mut watch::Receiver<bool>,
    failures: &mut u32,
) -> Exit {
    let (mut sink, mut stream) = ws.split();
    // Until the open packet arrives, the connect timeout applies
    let mut deadline = Duration::from_millis(CONNECT_TIMEOUT_MS);

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Message::text(Packet::Disconnect.encode())).await;
                if let Err(e) = sink.close().await {
                    debug!(channel = %id, error = %e, "Error closing websocket");
                }
                return Exit::Closed;
            }
            next = tokio::time::timeout(deadline, stream.next()) => next,
        };

        let text = match next {
            Err(_) => return Exit::Lost(PresenceError::Lost("ping timeout".to_string())),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                return Exit::Lost(PresenceError::Lost("transport close".to_string()))
            }
            Ok(Some(Err(e))) => return Exit::Lost(PresenceError::Lost(e.to_string())),
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(_))) => continue, // skip binary/ping/pong/frame
        };

        let packet = match Packet::decode(text.as_str()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(channel = %id, error = %e, "Ignoring malformed presence packet");
                continue;
            }
        };

        let reply = match packet {
            Packet::Open(info) => {
                deadline = heartbeat_deadline(&info);
                debug!(channel = %id, sid = %info.sid, "Engine.IO handshake complete");
                Some(Packet::Connect(None))
            }
            Packet::Ping => Some(Packet::Pong),
            Packet::Connect(_) => {
                *failures = 0;
                info!(channel = %id, "Presence channel connected");
                if events.send(PresenceEvent::Connected).await.is_err() {
                    return Exit::Abandoned;
                }
                None
            }
            Packet::ConnectError(message) => {
                if events
                    .send(PresenceEvent::ConnectError(message.clone()))
                    .await
                    .is_err()
                {
                    return Exit::Abandoned;
                }
                return Exit::Final(PresenceError::Refused(message).to_string());
            }
            Packet::Event { name, args } => {
                if name == ROSTER_EVENT {
                    match roster_from_args(&args) {
                        Some(ids) => {
                            if events.send(PresenceEvent::Roster(ids)).await.is_err() {
                                return Exit::Abandoned;
                            }
                        }
                        None => warn!(channel = %id, "Roster event without a list of ids"),
                    }
                } else {
                    debug!(channel = %id, event = %name, "Server event");
                    if events
                        .send(PresenceEvent::Event(ServerEvent { name, args }))
                        .await
                        .is_err()
                    {
                        return Exit::Abandoned;
                    }
                }
                None
            }
            Packet::Disconnect | Packet::Close => {
                return Exit::Final("io server disconnect".to_string());
            }
            Packet::Pong | Packet::Noop => None,
        };

        if let Some(reply) = reply {
            if let Err(e) = sink.send(Message::text(reply.encode())).await {
                return Exit::Lost(PresenceError::Lost(e.to_string()));
            }
        }
    }
}

/// Longest silence allowed between server pings
fn heartbeat_deadline(info: &OpenInfo) -> Duration {
    Duration::from_millis(info.ping_interval.saturating_add(info.ping_timeout))
}

/// First event argument as a list of user ids. Non-string entries are skipped.
fn roster_from_args(args: &[Value]) -> Option<Vec<String>> {
    match args.first() {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}
