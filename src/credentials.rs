//! API key lookup
//!
//! The synchronizer and the catalog only ask "is there a token, and what is
//! it". Where the token comes from (OS keyring, environment, a fixed value)
//! is decided once in [`crate::app::App`].

use crate::error::{Result, ZenError};
use std::sync::Arc;

/// Keyring service name for the stored API key
pub const KEYRING_SERVICE: &str = "zenchat";
/// Keyring user name for the stored API key
pub const KEYRING_USER: &str = "opencode_zen";
/// Environment variable consulted by [`EnvCredentials`]
pub const API_KEY_ENV: &str = "ZENCHAT_API_KEY";

/// Source of the current API token
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Current token, if one is configured
    fn token(&self) -> Option<String>;
}

/// Token stored in the OS keyring
#[derive(Debug, Clone)]
pub struct KeyringCredentials {
    service: String,
    user: String,
}

impl Default for KeyringCredentials {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_USER)
    }
}

impl KeyringCredentials {
    /// Credentials under an explicit service/user pair
    pub fn new(service: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user: user.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user).map_err(ZenError::Keyring)
    }

    /// Read the stored key, distinguishing "absent" from keyring failures
    pub fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(key) if key.trim().is_empty() => Ok(None),
            Ok(key) => Ok(Some(key)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ZenError::Keyring(e)),
        }
    }

    /// Save an API key
    pub fn store(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ZenError::InvalidInput("API key must not be empty".into()));
        }
        self.entry()?.set_password(key)?;
        tracing::info!("Stored API key in keyring");
        Ok(())
    }

    /// Remove the stored API key; absent keys are not an error
    pub fn clear(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ZenError::Keyring(e)),
        }
    }
}

impl CredentialProvider for KeyringCredentials {
    fn token(&self) -> Option<String> {
        match self.load() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Keyring unavailable, continuing without stored key: {}", e);
                None
            }
        }
    }
}

/// Token read from an environment variable on every lookup
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(API_KEY_ENV)
    }
}

impl EnvCredentials {
    /// Read the token from `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredentials {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Fixed token, or none
///
/// # Examples
///
/// ```
/// use zenchat::credentials::{CredentialProvider, StaticCredentials};
///
/// assert_eq!(StaticCredentials::new("sk-test").token().as_deref(), Some("sk-test"));
/// assert!(StaticCredentials::none().token().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    /// Always return `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Never return a token
    pub fn none() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Ask each provider in order; the first token wins
#[derive(Clone, Default)]
pub struct ChainedCredentials {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainedCredentials {
    /// Chain the given providers
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Environment first, then the keyring
    pub fn standard() -> Self {
        let env: Arc<dyn CredentialProvider> = Arc::new(EnvCredentials::default());
        let keyring: Arc<dyn CredentialProvider> = Arc::new(KeyringCredentials::default());
        Self::new(vec![env, keyring])
    }
}

impl CredentialProvider for ChainedCredentials {
    fn token(&self) -> Option<String> {
        self.providers.iter().find_map(|p| p.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_chain_returns_first_token() {
        let mut first = MockCredentialProvider::new();
        first.expect_token().times(1).returning(|| None);
        let mut second = MockCredentialProvider::new();
        second
            .expect_token()
            .times(1)
            .returning(|| Some("from-second".to_string()));
        let mut third = MockCredentialProvider::new();
        third.expect_token().times(0);

        let providers: Vec<Arc<dyn CredentialProvider>> =
            vec![Arc::new(first), Arc::new(second), Arc::new(third)];
        let chain = ChainedCredentials::new(providers);
        assert_eq!(chain.token().as_deref(), Some("from-second"));
    }

    #[test]
    fn test_empty_chain_has_no_token() {
        assert!(ChainedCredentials::default().token().is_none());
    }

    #[test]
    #[serial]
    fn test_env_credentials_reads_and_trims() {
        std::env::set_var("ZENCHAT_TEST_KEY", "  sk-env  ");
        let creds = EnvCredentials::new("ZENCHAT_TEST_KEY");
        assert_eq!(creds.token().as_deref(), Some("sk-env"));

        std::env::set_var("ZENCHAT_TEST_KEY", "   ");
        assert!(creds.token().is_none());

        std::env::remove_var("ZENCHAT_TEST_KEY");
        assert!(creds.token().is_none());
    }

    #[test]
    fn test_keyring_store_rejects_empty_key() {
        let creds = KeyringCredentials::new("zenchat-test", "nobody");
        let err = creds.store("   ").unwrap_err();
        assert!(matches!(err, ZenError::InvalidInput(_)));
    }
}
