//! Session state management for QuickChat clients.
//!
//! `SessionManager` owns the session token, the authenticated user's profile
//! and the presence channel, and keeps the three consistent with each other
//! and with the persisted token:
//!
//! - a user is only ever held together with a token
//! - a presence channel is only open for a known user, and at most one is
//!   open at a time (the previous one is closed before a new one opens)
//! - logout clears everything, whatever state it finds
//!
//! Every operation reports its outcome through the [`Notifier`] and never
//! returns an error to the caller. Responses that arrive after the session
//! moved on (a logout or a new login while the request was in flight) are
//! dropped rather than applied.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, AuthBackend, AuthorizedClient};
use crate::auth::{self, TokenStore};
use crate::config::Config;
use crate::models::{AuthMode, AuthUser, Credentials, ProfilePatch};
use crate::notify::{LogNotifier, NoticeKind, Notifier};
use crate::presence::{
    ChannelId, PresenceConnector, PresenceEvent, PresenceHandle, ServerEvent, SocketConnector,
};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_SUCCESS_MESSAGE: &str = "Logged in successfully";
const LOGOUT_MESSAGE: &str = "Logged out successfully";
const PROFILE_UPDATED_MESSAGE: &str = "Profile updated successfully";
const NOT_LOGGED_IN_MESSAGE: &str = "Not logged in";

/// Server events queued per subscriber before the slowest one starts lagging
const SERVER_EVENT_BUFFER: usize = 64;

// ============================================================================
// Public state types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionPhase {
    #[default]
    Unauthenticated,
    /// A stored token is being checked with the backend
    Validating,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum PresenceStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What an operation ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// State was updated from the backend response
    Applied,
    /// The backend refused or could not be reached; carries the message shown
    Rejected(String),
    /// The response arrived after a logout or a newer login and was dropped
    Stale,
    /// Nothing to do (no stored token, already initialized, not logged in)
    Skipped,
}

/// Point-in-time copy of the session state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub token: Option<String>,
    pub user: Option<AuthUser>,
    pub online_users: Vec<String>,
    pub presence: PresenceStatus,
    pub channel: Option<ChannelId>,
}

/// The live presence channel as seen from outside the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    /// User id the channel was opened for
    pub identity: String,
    pub closed: bool,
}

// ============================================================================
// Internal state
// ============================================================================

struct ActiveChannel {
    handle: Box<dyn PresenceHandle>,
    forwarder: JoinHandle<()>,
}

impl ActiveChannel {
    fn close(self) {
        debug!(channel = %self.handle.id(), identity = self.handle.identity(), "Closing presence channel");
        self.handle.close();
        self.forwarder.abort();
    }
}

#[derive(Default)]
struct SessionState {
    phase: SessionPhase,
    token: Option<String>,
    user: Option<AuthUser>,
    online_users: Vec<String>,
    presence: PresenceStatus,
    channel: Option<ActiveChannel>,
    /// Bumped on logout and on every successful login; a response is only
    /// applied if the generation it started under is still current.
    generation: u64,
    initialized: bool,
}

impl SessionState {
    fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|c| c.handle.id())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            token: self.token.clone(),
            user: self.user.clone(),
            online_users: self.online_users.clone(),
            presence: self.presence,
            channel: self.channel_id(),
        }
    }
}

/// State shared with the presence forwarding task
struct Shared {
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionSnapshot>,
    server_events: broadcast::Sender<ServerEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` under the lock and publish the resulting snapshot
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.updates.send_replace(state.snapshot());
        result
    }
}

// ============================================================================
// SessionManager
// ============================================================================

pub struct SessionManager {
    backend: Arc<dyn AuthBackend>,
    /// HTTP client handed out, with the current token, for app requests
    http: Option<ApiClient>,
    presence: Option<Arc<dyn PresenceConnector>>,
    store: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    shared: Arc<Shared>,
}

impl SessionManager {
    /// `presence: None` disables the presence channel entirely
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        presence: Option<Arc<dyn PresenceConnector>>,
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        let (server_events, _) = broadcast::channel(SERVER_EVENT_BUFFER);
        Self {
            backend,
            http: None,
            presence,
            store,
            notifier,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                updates,
                server_events,
            }),
        }
    }

    /// Wire up the HTTP backend, token store and websocket presence channel
    /// described by `config`. Notifications go to the log until replaced
    /// with [`SessionManager::with_notifier`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = ApiClient::from_config(config)?;
        let store = auth::store_from_config(config)?;
        let presence: Option<Arc<dyn PresenceConnector>> = if config.presence.enabled {
            Some(Arc::new(SocketConnector::from_config(config)?))
        } else {
            None
        };
        Ok(Self::new(Arc::new(client.clone()), presence, store, Arc::new(LogNotifier))
            .with_http_client(client))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Enable [`SessionManager::authorized_client`] for app requests
    pub fn with_http_client(mut self, client: ApiClient) -> Self {
        self.http = Some(client);
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn token(&self) -> Option<String> {
        self.shared.lock().token.clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.shared.lock().user.clone()
    }

    pub fn online_users(&self) -> Vec<String> {
        self.shared.lock().online_users.clone()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.shared.lock().online_users.iter().any(|id| id == user_id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.lock().user.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    pub fn presence_status(&self) -> PresenceStatus {
        self.shared.lock().presence
    }

    /// Id of the current presence channel, if one is held
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.shared.lock().channel_id()
    }

    pub fn channel(&self) -> Option<ChannelInfo> {
        self.shared.lock().channel.as_ref().map(|c| ChannelInfo {
            id: c.handle.id(),
            identity: c.handle.identity().to_string(),
            closed: c.handle.is_closed(),
        })
    }

    pub fn backend(&self) -> Arc<dyn AuthBackend> {
        Arc::clone(&self.backend)
    }

    /// HTTP client carrying the current session token, for requests beyond
    /// auth. `None` when logged out or built without an HTTP client. The
    /// token is captured now; fetch a new client after a re-login.
    pub fn authorized_client(&self) -> Option<AuthorizedClient> {
        let http = self.http.as_ref()?;
        let state = self.shared.lock();
        if state.user.is_none() {
            return None;
        }
        let token = state.token.clone()?;
        Some(AuthorizedClient::new(http.clone(), token))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Receive a new snapshot after every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Receive server events other than the roster (e.g. `newMessage`) from
    /// the current presence channel, across reconnects and re-logins
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.server_events.subscribe()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Restore the session from the persisted token. Meant to be called once
    /// at startup; later calls do nothing.
    pub async fn initialize(&self) -> Outcome {
        let first = self.shared.mutate(|s| !std::mem::replace(&mut s.initialized, true));
        if !first {
            debug!("Session already initialized");
            return Outcome::Skipped;
        }

        let token = match self.store.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                None
            }
        };

        let Some(token) = token else {
            debug!("No stored token, starting unauthenticated");
            return Outcome::Skipped;
        };

        self.shared.mutate(|s| s.token = Some(token));
        self.validate().await
    }

    /// Check the held token with the backend. On success the user is set and
    /// a presence channel opened; on failure the session is logged out.
    pub async fn validate(&self) -> Outcome {
        let pending = self.shared.mutate(|s| {
            let token = s.token.clone()?;
            if s.user.is_none() {
                s.phase = SessionPhase::Validating;
            }
            Some((token, s.generation))
        });
        let Some((token, generation)) = pending else {
            debug!("No token to validate");
            return Outcome::Skipped;
        };

        match self.backend.check(&token).await {
            Ok(user) => {
                let applied = self.shared.mutate(|s| {
                    if s.generation != generation {
                        return false;
                    }
                    s.user = Some(user.clone());
                    s.phase = SessionPhase::Authenticated;
                    true
                });
                if !applied {
                    debug!("Discarding stale validation response");
                    return Outcome::Stale;
                }
                debug!(user_id = %user.id, "Session validated");
                self.connect_presence(Some(&user));
                Outcome::Applied
            }
            Err(e) => {
                if self.shared.lock().generation != generation {
                    debug!(error = %e, "Discarding stale validation failure");
                    return Outcome::Stale;
                }
                warn!(error = %e, "Session validation failed");
                let message = e.user_message();
                self.notifier.notify(NoticeKind::Error, &message);
                self.logout();
                Outcome::Rejected(message)
            }
        }
    }

    /// Sign in or register. State is only touched when the backend accepts.
    pub async fn login(&self, mode: AuthMode, credentials: &Credentials) -> Outcome {
        let generation = self.shared.lock().generation;

        let success = match self.backend.authenticate(mode, credentials).await {
            Ok(success) => success,
            Err(e) => {
                warn!(mode = %mode, error = %e, "Login failed");
                let message = e.user_message();
                self.notifier.notify(NoticeKind::Error, &message);
                return Outcome::Rejected(message);
            }
        };

        let applied = self.shared.mutate(|s| {
            if s.generation != generation {
                return false;
            }
            s.generation += 1;
            s.token = Some(success.token.clone());
            s.user = Some(success.user.clone());
            s.phase = SessionPhase::Authenticated;
            true
        });
        if !applied {
            debug!("Discarding stale login response");
            return Outcome::Stale;
        }

        if let Err(e) = self.store.save(&success.token) {
            warn!(error = %e, "Failed to persist session token");
        }

        info!(user_id = %success.user.id, mode = %mode, "Login successful");
        let message = success
            .message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(LOGIN_SUCCESS_MESSAGE);
        self.notifier.notify(NoticeKind::Success, message);

        self.connect_presence(Some(&success.user));
        Outcome::Applied
    }

    /// Clear the session, whatever state it is in.
    pub fn logout(&self) {
        let channel = self.shared.mutate(|s| {
            s.generation += 1;
            s.phase = SessionPhase::Unauthenticated;
            s.user = None;
            s.token = None;
            s.online_users.clear();
            s.presence = PresenceStatus::Disconnected;
            s.channel.take()
        });

        if let Some(channel) = channel {
            channel.close();
        }

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to remove stored token");
        }

        info!("Logged out");
        self.notifier.notify(NoticeKind::Success, LOGOUT_MESSAGE);
    }

    /// Send a profile change; the returned profile replaces the held one.
    pub async fn update_profile(&self, patch: &ProfilePatch) -> Outcome {
        let pending = {
            let s = self.shared.lock();
            match (&s.token, &s.user) {
                (Some(token), Some(_)) => Some((token.clone(), s.generation)),
                _ => None,
            }
        };
        let Some((token, generation)) = pending else {
            self.notifier.notify(NoticeKind::Error, NOT_LOGGED_IN_MESSAGE);
            return Outcome::Skipped;
        };

        match self.backend.update_profile(&token, patch).await {
            Ok(user) => {
                let applied = self.shared.mutate(|s| {
                    if s.generation != generation {
                        return false;
                    }
                    s.user = Some(user);
                    true
                });
                if !applied {
                    debug!("Discarding stale profile update");
                    return Outcome::Stale;
                }
                info!("Profile updated");
                self.notifier.notify(NoticeKind::Success, PROFILE_UPDATED_MESSAGE);
                Outcome::Applied
            }
            Err(e) => {
                warn!(error = %e, "Profile update failed");
                let message = e.user_message();
                self.notifier.notify(NoticeKind::Error, &message);
                Outcome::Rejected(message)
            }
        }
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Replace the presence channel with one for `user`. Everything happens
    /// under the state lock, so two concurrent calls cannot both leave a
    /// channel open.
    fn connect_presence(&self, user: Option<&AuthUser>) {
        let Some(user) = user else {
            return;
        };
        let Some(connector) = self.presence.as_ref() else {
            debug!("Presence disabled");
            return;
        };

        let shared = Arc::clone(&self.shared);
        self.shared.mutate(|s| {
            if s.user.as_ref().map(|u| u.id.as_str()) != Some(user.id.as_str()) {
                debug!(user_id = %user.id, "User changed before presence connect, skipping");
                return;
            }

            if let Some(previous) = s.channel.take() {
                previous.close();
            }
            s.presence = PresenceStatus::Disconnected;

            match connector.open(&user.id) {
                Ok(connection) => {
                    let id = connection.handle.id();
                    debug!(channel = %id, user_id = %user.id, "Presence channel opening");
                    let forwarder = tokio::spawn(forward_events(shared, id, connection.events));
                    s.channel = Some(ActiveChannel {
                        handle: connection.handle,
                        forwarder,
                    });
                    s.presence = PresenceStatus::Connecting;
                }
                Err(e) => warn!(error = %e, "Failed to open presence channel"),
            }
        });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(channel) = self.shared.lock().channel.take() {
            channel.close();
        }
    }
}

/// Apply events from one channel until it ends or is superseded
async fn forward_events(
    shared: Arc<Shared>,
    channel: ChannelId,
    mut events: mpsc::Receiver<PresenceEvent>,
) {
    while let Some(event) = events.recv().await {
        let applied = match event {
            PresenceEvent::Event(server_event) => {
                let current = shared.lock().channel_id() == Some(channel);
                if current {
                    // No subscribers is fine
                    let _ = shared.server_events.send(server_event);
                }
                current
            }
            event => shared.mutate(|s| {
                if s.channel_id() != Some(channel) {
                    return false;
                }
                match event {
                    PresenceEvent::Connected => s.presence = PresenceStatus::Connected,
                    PresenceEvent::ConnectError(message) => {
                        // The transport retries; Disconnected follows if it gives up
                        warn!(channel = %channel, error = %message, "Presence connection error");
                        s.presence = PresenceStatus::Connecting;
                    }
                    PresenceEvent::Roster(ids) => {
                        debug!(channel = %channel, online = ids.len(), "Roster update");
                        s.online_users = ids;
                    }
                    PresenceEvent::Disconnected { reason } => {
                        debug!(channel = %channel, reason = %reason, "Presence channel disconnected");
                        s.presence = PresenceStatus::Disconnected;
                    }
                    PresenceEvent::Event(_) => {}
                }
                true
            }),
        };

        if !applied {
            debug!(channel = %channel, "Dropping events from superseded presence channel");
            return;
        }
    }
}
