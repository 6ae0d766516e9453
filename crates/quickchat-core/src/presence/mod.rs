//! Realtime presence channel.
//!
//! A presence channel is opened per signed-in user and reports the roster
//! of currently connected user ids. The session layer sees it only through
//! [`PresenceConnector`] / [`PresenceHandle`]; [`SocketConnector`] is the
//! Socket.IO-over-websocket implementation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

pub mod packet;
pub mod socket;

pub use socket::{SocketConnector, SocketHandle};

/// Buffer size for the channel event queue.
/// Roster updates are small and rare; 32 leaves plenty of headroom.
pub const EVENT_BUFFER_SIZE: usize = 32;

/// Counter for generating unique channel IDs.
static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one opened channel, so events from a superseded channel can
/// be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// A named server event other than the roster, e.g. `newMessage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub name: String,
    pub args: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Handshake finished, the server accepted the connection
    Connected,
    /// Connecting failed, the connection was lost or the server refused it.
    /// Followed by `Connected` after a successful retry, or `Disconnected`.
    ConnectError(String),
    /// Full list of online user ids, replacing any previous list
    Roster(Vec<String>),
    /// Any other event the server emits on the channel
    Event(ServerEvent),
    /// Connection is gone and the transport is not retrying (right now)
    Disconnected { reason: String },
}

/// Errors that can occur while running a presence channel.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("invalid presence endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection refused by server: {0}")]
    Refused(String),

    #[error("connection lost: {0}")]
    Lost(String),
}

/// Live connection owned by the session manager.
pub trait PresenceHandle: Send + Sync {
    fn id(&self) -> ChannelId;

    /// User identity the channel was opened for
    fn identity(&self) -> &str;

    /// Close the connection. Idempotent; returns immediately, the transport
    /// finishes the close handshake in the background.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A freshly opened channel: its handle plus the stream of its events
pub struct PresenceConnection {
    pub handle: Box<dyn PresenceHandle>,
    pub events: mpsc::Receiver<PresenceEvent>,
}

pub trait PresenceConnector: Send + Sync {
    /// Open a channel for `identity`. Returns as soon as the connection is
    /// started; progress and failures arrive as [`PresenceEvent`]s.
    /// Must be called from within a Tokio runtime.
    fn open(&self, identity: &str) -> Result<PresenceConnection, PresenceError>;
}
