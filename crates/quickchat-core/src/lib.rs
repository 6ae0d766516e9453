//! Core library for QuickChat clients.
//!
//! Owns the client side of a chat session: the stored session token, the
//! authenticated user's profile and the realtime presence connection that
//! reports which users are online.
//!
//! - [`SessionManager`]: keeps token, profile and presence channel consistent
//! - [`ApiClient`]: HTTP client for the auth backend
//! - [`SocketConnector`]: Socket.IO presence channel over websocket
//! - [`TokenStore`]: persisted token storage (file, keychain, memory)

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod notify;
pub mod presence;
pub mod session;

pub use api::{ApiClient, ApiError, AuthBackend, AuthorizedClient};
pub use auth::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use config::{Config, PresenceConfig, TokenStorage};
pub use models::{AuthMode, AuthUser, Credentials, ProfilePatch};
pub use notify::{LogNotifier, NoticeKind, Notifier};
pub use presence::{
    ChannelId, PresenceConnection, PresenceConnector, PresenceError, PresenceEvent,
    PresenceHandle, ServerEvent, SocketConnector,
};
pub use session::{
    ChannelInfo, Outcome, PresenceStatus, SessionManager, SessionPhase, SessionSnapshot,
};
