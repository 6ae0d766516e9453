//! Persistence for the session token.
//!
//! This module provides:
//! - `TokenStore`: the storage seam the session manager writes through
//! - `FileTokenStore`: token persisted to `session.json` in the data directory
//! - `KeyringTokenStore`: token kept in the OS keychain via keyring
//! - `MemoryTokenStore`: process-local storage for tests and embedding

pub mod credentials;
pub mod store;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, TokenStorage};

pub use credentials::KeyringTokenStore;
pub use store::{FileTokenStore, MemoryTokenStore, StoredToken};

/// Durable key-value slot for the session token. All operations are
/// idempotent: clearing an empty store succeeds.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Build the store selected by `config.token_storage`
pub fn store_from_config(config: &Config) -> Result<Arc<dyn TokenStore>> {
    Ok(match config.token_storage {
        TokenStorage::File => Arc::new(FileTokenStore::new(config.data_dir()?)),
        TokenStorage::Keyring => Arc::new(KeyringTokenStore::new()),
    })
}
