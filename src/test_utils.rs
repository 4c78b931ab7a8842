//! Test utilities for zenchat
//!
//! Temporary stores, a wired synchronizer harness and assertion helpers
//! shared by the unit tests.

use crate::catalog::ModelCatalog;
use crate::config::{CatalogConfig, Config};
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::error::{Result, ZenError};
use crate::providers::CompletionClient;
use crate::storage::{ConversationStore, SqliteStorage};
use crate::sync::{Synchronizer, WorkerPool};
use std::sync::Arc;
use tempfile::TempDir;

pub use crate::providers::scripted::{ScriptedClient, Step};

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Open a store in a fresh temporary directory
///
/// Keep the returned `TempDir` alive for as long as the store is used.
pub fn temp_storage() -> (Arc<SqliteStorage>, TempDir) {
    let dir = temp_dir();
    let storage = SqliteStorage::new_with_path(dir.path().join("zenchat.db"))
        .expect("Failed to create test storage");
    (Arc::new(storage), dir)
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Create a test configuration with default values
pub fn test_config() -> Config {
    Config::default()
}

/// A synchronizer over a temporary store and a scripted client
pub struct Harness {
    pub sync: Arc<Synchronizer>,
    pub store: Arc<SqliteStorage>,
    pub client: Arc<ScriptedClient>,
    pub catalog: Arc<ModelCatalog>,
    _dir: TempDir,
}

/// Build a [`Harness`]; `token` is the API key the credential seam reports
pub fn harness(client: ScriptedClient, token: Option<&str>) -> Harness {
    let (store, dir) = temp_storage();
    let client = Arc::new(client);
    let credentials: Arc<dyn CredentialProvider> = Arc::new(match token {
        Some(t) => StaticCredentials::new(t),
        None => StaticCredentials::none(),
    });
    let pool = WorkerPool::new(2);
    let dyn_store: Arc<dyn ConversationStore> = store.clone();
    let dyn_client: Arc<dyn CompletionClient> = client.clone();

    let catalog = Arc::new(ModelCatalog::new(
        &CatalogConfig::default(),
        dyn_client.clone(),
        credentials.clone(),
        dyn_store.clone(),
        pool.clone(),
    ));
    let sync = Arc::new(Synchronizer::new(
        dyn_store,
        dyn_client,
        credentials,
        catalog.clone(),
        pool,
    ));

    Harness {
        sync,
        store,
        client,
        catalog,
        _dir: dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_storage_creates_database() {
        let (storage, dir) = temp_storage();
        assert!(storage.db_path().starts_with(dir.path()));
        assert!(storage.db_path().exists());
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<()> = Err(ZenError::Config("test error message".to_string()));
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        let result: Result<()> = Ok(());
        assert_error_contains(result, "error");
    }

    #[test]
    fn test_test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }
}
