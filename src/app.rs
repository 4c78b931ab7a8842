//! Composition root
//!
//! Builds the store, worker pool, HTTP client, credentials, catalog and
//! synchronizer from a [`Config`] and hands out shared references.

use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::credentials::{ChainedCredentials, CredentialProvider};
use crate::error::Result;
use crate::providers::{CompletionClient, ZenClient};
use crate::storage::{ConversationStore, SqliteStorage};
use crate::sync::{Synchronizer, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

/// Wired application services
pub struct App {
    pub config: Config,
    pub store: Arc<dyn ConversationStore>,
    pub catalog: Arc<ModelCatalog>,
    pub sync: Arc<Synchronizer>,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl App {
    /// Build every service from configuration
    ///
    /// Opens the database, finalizes replies abandoned by a process that
    /// went away and restores saved catalog preferences. Replies another
    /// process is still streaming are left alone.
    pub async fn from_config(config: Config) -> Result<Self> {
        let storage = match &config.storage.path {
            Some(path) => SqliteStorage::new_with_path(path)?,
            None => SqliteStorage::new()?,
        };
        tracing::debug!("Using conversation database {}", storage.db_path().display());
        let store: Arc<dyn ConversationStore> = Arc::new(storage);

        let client: Arc<dyn CompletionClient> = Arc::new(ZenClient::new(
            &config.provider,
            config.sync.delta_channel_capacity,
        )?);
        let credentials: Arc<dyn CredentialProvider> = Arc::new(ChainedCredentials::standard());

        Self::with_parts(config, store, client, credentials).await
    }

    /// Build from explicit collaborators
    pub async fn with_parts(
        config: Config,
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.sync.worker_threads);

        let recovery_store = store.clone();
        let stale_after = Duration::from_secs(config.sync.recover_after_seconds);
        let recovered = pool
            .run(move || recovery_store.recover_interrupted(stale_after))
            .await?;
        if recovered > 0 {
            tracing::warn!("Finalized {} interrupted replies", recovered);
        }

        let catalog = Arc::new(ModelCatalog::new(
            &config.catalog,
            client.clone(),
            credentials.clone(),
            store.clone(),
            pool.clone(),
        ));
        catalog.restore_preferences().await?;

        let sync = Arc::new(
            Synchronizer::new(
                store.clone(),
                client,
                credentials.clone(),
                catalog.clone(),
                pool,
            )
            .with_system_prompt(config.sync.system_prompt.clone()),
        );

        Ok(Self {
            config,
            store,
            catalog,
            sync,
            credentials,
        })
    }

    /// Whether streaming is the configured default
    pub fn streaming(&self) -> bool {
        self.config.sync.streaming
    }
}
