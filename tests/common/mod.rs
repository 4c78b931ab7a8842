use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use zenchat::catalog::ModelCatalog;
use zenchat::config::CatalogConfig;
use zenchat::credentials::{CredentialProvider, StaticCredentials};
use zenchat::providers::scripted::ScriptedClient;
use zenchat::providers::CompletionClient;
use zenchat::storage::{ConversationStore, SqliteStorage, StoreEvent};
use zenchat::sync::{Synchronizer, WorkerPool};

#[allow(dead_code)]
pub fn create_temp_storage() -> (Arc<SqliteStorage>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("zenchat.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (Arc::new(storage), tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn credentials(token: Option<&str>) -> Arc<dyn CredentialProvider> {
    match token {
        Some(t) => Arc::new(StaticCredentials::new(t)),
        None => Arc::new(StaticCredentials::none()),
    }
}

/// Synchronizer wired over a temp store and a scripted client
#[allow(dead_code)]
pub struct SyncFixture {
    pub sync: Arc<Synchronizer>,
    pub store: Arc<SqliteStorage>,
    pub client: Arc<ScriptedClient>,
    pub catalog: Arc<ModelCatalog>,
    _dir: TempDir,
}

#[allow(dead_code)]
pub fn sync_fixture(client: ScriptedClient, token: Option<&str>) -> SyncFixture {
    let (store, dir) = create_temp_storage();
    let client = Arc::new(client);
    let credentials = credentials(token);
    let pool = WorkerPool::new(4);
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

    SyncFixture {
        sync,
        store,
        client,
        catalog,
        _dir: dir,
    }
}

/// Wait for the first event matching `predicate`
#[allow(dead_code)]
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<StoreEvent>, predicate: F) -> StoreEvent
where
    F: Fn(&StoreEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for store event")
}
