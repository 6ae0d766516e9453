use anyhow::{Context, Result};
use keyring::Entry;

use super::TokenStore;

const SERVICE_NAME: &str = "quickchat";
const ACCOUNT_NAME: &str = "session-token";

/// Session token kept in the OS keychain
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, ACCOUNT_NAME).context("Failed to create keyring entry")
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token).filter(|t| !t.is_empty())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::store_from_config;
    use crate::config::{Config, TokenStorage};

    /// Needs a reachable OS keychain (macOS Keychain, Windows Credential
    /// Manager or Linux keyutils). Run with `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn test_keyring_token_survives_new_store() {
        let config = Config {
            token_storage: TokenStorage::Keyring,
            ..Config::default()
        };

        let writer = store_from_config(&config).unwrap();
        writer.save("keyring-t1").unwrap();

        // A separate store instance reads what the first one wrote
        let reader = store_from_config(&config).unwrap();
        assert_eq!(reader.load().unwrap().as_deref(), Some("keyring-t1"));

        reader.clear().unwrap();
        assert_eq!(writer.load().unwrap(), None);
        reader.clear().unwrap();
    }
}
