//! Model catalog
//!
//! Resolves which models can be used right now. With a credential the
//! remote listing is fetched and merged with the built-in free set; without
//! one (or when the listing fails) the free set alone is served. Results are
//! cached in memory for the configured TTL and the fetch time is recorded in
//! the settings table under `models_cache`.

pub mod free;
pub mod model;

pub use free::{
    builtin_free_model, builtin_free_models, canonical_model_id, is_builtin_free_id,
    DEFAULT_FREE_MODEL_ID,
};
pub use model::{
    display_name_for, provider_name_for, Capabilities, ModelDescriptor, Price, Pricing,
};

use crate::config::CatalogConfig;
use crate::credentials::CredentialProvider;
use crate::error::{Result, ZenError};
use crate::providers::CompletionClient;
use crate::storage::{
    ConversationStore, SETTING_DEFAULT_MODEL, SETTING_FREE_MODE, SETTING_MODELS_CACHE,
};
use crate::sync::WorkerPool;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Progress of the most recent listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Nothing requested yet
    Idle,
    /// A remote listing is in progress
    Fetching,
    /// Last request produced an authoritative list
    Ready,
    /// Last request fell back to the free set after a remote failure
    Degraded,
    /// Last request produced no list
    Failed,
}

/// Result of [`ModelCatalog::list_models`]
#[derive(Debug)]
pub struct ModelList {
    /// Usable models, remote entries first
    pub models: Vec<ModelDescriptor>,
    /// Remote failure that caused a fallback to the free set
    pub advisory: Option<ZenError>,
    /// Served from the in-memory cache
    pub from_cache: bool,
}

struct CachedModels {
    models: Vec<ModelDescriptor>,
    fetched_at: Instant,
}

/// Merge a remote listing with the built-in free set
///
/// Remote entries win on id collisions, including `sonic` vs
/// `opencode/sonic`.
pub fn merge_with_free(remote: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(remote.len() + 8);
    for model in remote.into_iter().chain(builtin_free_models()) {
        if seen.insert(model.canonical_id().to_string()) {
            merged.push(model);
        }
    }
    merged
}

/// Resolves usable models and the default model
pub struct ModelCatalog {
    client: Arc<dyn CompletionClient>,
    credentials: Arc<dyn CredentialProvider>,
    store: Arc<dyn ConversationStore>,
    pool: WorkerPool,
    ttl: Duration,
    free_mode: AtomicBool,
    cache: RwLock<Option<CachedModels>>,
    state: RwLock<FetchState>,
    refresh_lock: Mutex<()>,
}

impl ModelCatalog {
    /// Create a catalog
    pub fn new(
        config: &CatalogConfig,
        client: Arc<dyn CompletionClient>,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<dyn ConversationStore>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            client,
            credentials,
            store,
            pool,
            ttl: Duration::from_secs(config.cache_ttl_seconds),
            free_mode: AtomicBool::new(config.free_mode),
            cache: RwLock::new(None),
            state: RwLock::new(FetchState::Idle),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Apply a persisted free-mode preference, if one was saved
    pub async fn restore_preferences(&self) -> Result<()> {
        let store = self.store.clone();
        let saved = self
            .pool
            .run(move || store.get_setting(SETTING_FREE_MODE))
            .await?;
        if let Some(setting) = saved {
            let enabled = setting.value == "true";
            tracing::debug!("Restored free mode preference: {}", enabled);
            self.free_mode.store(enabled, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn set_state(&self, state: FetchState) {
        let mut guard = self.state.write().await;
        if *guard != state {
            tracing::debug!("Model catalog state: {:?} -> {:?}", *guard, state);
        }
        *guard = state;
    }

    async fn cached_if_fresh(&self) -> Option<Vec<ModelDescriptor>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.models.clone())
    }

    /// Usable models
    ///
    /// A fresh cached result is returned unless `force_refresh` is set.
    /// Without a credential the built-in free set is returned directly, or
    /// `AuthRequired` when free mode is disabled. Remote failures fall back
    /// to the free set and are reported in [`ModelList::advisory`].
    pub async fn list_models(&self, force_refresh: bool) -> Result<ModelList> {
        if !force_refresh {
            if let Some(models) = self.cached_if_fresh().await {
                tracing::debug!("Using cached model list ({} models)", models.len());
                return Ok(ModelList {
                    models,
                    advisory: None,
                    from_cache: true,
                });
            }
        }

        let _refresh = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if !force_refresh {
            if let Some(models) = self.cached_if_fresh().await {
                return Ok(ModelList {
                    models,
                    advisory: None,
                    from_cache: true,
                });
            }
        }

        let Some(token) = self.credentials.token() else {
            if self.is_free_mode() {
                tracing::debug!("No credential; serving built-in free models");
                self.set_state(FetchState::Ready).await;
                return Ok(ModelList {
                    models: builtin_free_models(),
                    advisory: None,
                    from_cache: false,
                });
            }
            self.set_state(FetchState::Failed).await;
            return Err(ZenError::AuthRequired(
                "an API key is required when free mode is disabled".to_string(),
            ));
        };

        self.set_state(FetchState::Fetching).await;
        match self.client.list_models(&token).await {
            Ok(remote) => {
                let remote: Vec<ModelDescriptor> =
                    remote.into_iter().map(ModelDescriptor::from_remote).collect();
                let models = merge_with_free(remote);
                tracing::info!("Fetched {} models from OpenCode Zen", models.len());

                *self.cache.write().await = Some(CachedModels {
                    models: models.clone(),
                    fetched_at: Instant::now(),
                });
                self.set_state(FetchState::Ready).await;

                let store = self.store.clone();
                let marker = Utc::now().timestamp_millis().to_string();
                if let Err(e) = self
                    .pool
                    .run(move || store.set_setting(SETTING_MODELS_CACHE, &marker))
                    .await
                {
                    tracing::warn!("Failed to record model cache marker: {}", e);
                }

                Ok(ModelList {
                    models,
                    advisory: None,
                    from_cache: false,
                })
            }
            Err(e) => {
                tracing::warn!("Model listing failed, falling back to free models: {}", e);
                self.set_state(FetchState::Degraded).await;
                Ok(ModelList {
                    models: builtin_free_models(),
                    advisory: Some(e),
                    from_cache: false,
                })
            }
        }
    }

    /// Drop the in-memory cache
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// When the remote listing was last fetched, per the settings marker
    pub async fn last_fetched_at(&self) -> Result<Option<DateTime<Utc>>> {
        let store = self.store.clone();
        let marker = self
            .pool
            .run(move || store.get_setting(SETTING_MODELS_CACHE))
            .await?;
        Ok(marker
            .and_then(|s| s.value.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    /// Current fetch state
    pub async fn state(&self) -> FetchState {
        *self.state.read().await
    }

    /// Whether the built-in free models may be used without a key
    pub fn is_free_mode(&self) -> bool {
        self.free_mode.load(Ordering::SeqCst)
    }

    /// Enable or disable free mode and persist the choice
    pub async fn set_free_mode(&self, enabled: bool) -> Result<()> {
        self.free_mode.store(enabled, Ordering::SeqCst);
        let store = self.store.clone();
        let value = enabled.to_string();
        self.pool
            .run(move || store.set_setting(SETTING_FREE_MODE, &value))
            .await?;
        tracing::info!("Free mode {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// The built-in free set
    pub fn builtin_free_models(&self) -> Vec<ModelDescriptor> {
        builtin_free_models()
    }

    /// Saved default model, else the built-in default in free mode
    pub async fn get_default_model(&self) -> Result<Option<String>> {
        let store = self.store.clone();
        let saved = self
            .pool
            .run(move || store.get_setting(SETTING_DEFAULT_MODEL))
            .await?;
        if let Some(setting) = saved.filter(|s| !s.value.trim().is_empty()) {
            return Ok(Some(setting.value));
        }
        Ok(self
            .is_free_mode()
            .then(|| DEFAULT_FREE_MODEL_ID.to_string()))
    }

    /// Persist the default model
    pub async fn set_default_model(&self, model_id: &str) -> Result<()> {
        let model_id = model_id.trim().to_string();
        if model_id.is_empty() {
            return Err(ZenError::InvalidInput("model id must not be empty".into()));
        }
        let store = self.store.clone();
        let value = model_id.clone();
        self.pool
            .run(move || store.set_setting(SETTING_DEFAULT_MODEL, &value))
            .await?;
        tracing::info!("Default model set to {}", model_id);
        Ok(())
    }

    async fn known_models(&self) -> Vec<ModelDescriptor> {
        match self.cache.read().await.as_ref() {
            Some(cached) => cached.models.clone(),
            None => builtin_free_models(),
        }
    }

    /// A model from the last listing or the free set
    pub async fn get_model(&self, model_id: &str) -> Option<ModelDescriptor> {
        let models = self.known_models().await;
        models
            .iter()
            .find(|m| m.id == model_id)
            .or_else(|| {
                let bare = canonical_model_id(model_id);
                models.iter().find(|m| m.canonical_id() == bare)
            })
            .cloned()
    }

    /// Descriptor for any id, synthesizing one for ids no listing mentions
    pub async fn describe(&self, model_id: &str) -> ModelDescriptor {
        match self.get_model(model_id).await {
            Some(model) => model,
            None => ModelDescriptor::unlisted(model_id),
        }
    }

    /// Known models whose provider name matches exactly
    pub async fn models_by_provider(&self, provider: &str) -> Vec<ModelDescriptor> {
        self.known_models()
            .await
            .into_iter()
            .filter(|m| m.provider_name == provider)
            .collect()
    }

    /// Known models that are free
    pub async fn free_models(&self) -> Vec<ModelDescriptor> {
        self.known_models()
            .await
            .into_iter()
            .filter(|m| m.is_free)
            .collect()
    }

    /// Case-insensitive match on id or display name
    pub async fn search_models(&self, query: &str) -> Vec<ModelDescriptor> {
        let needle = query.to_lowercase();
        self.known_models()
            .await
            .into_iter()
            .filter(|m| {
                m.id.to_lowercase().contains(&needle)
                    || m.display_name.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_descriptor(id: &str) -> ModelDescriptor {
        let mut model = ModelDescriptor::unlisted(id);
        model.display_name = format!("remote {}", id);
        model
    }

    #[test]
    fn test_merge_remote_wins_and_free_appended() {
        let merged = merge_with_free(vec![
            remote_descriptor("sonic"),
            remote_descriptor("claude-sonnet-4"),
        ]);
        assert_eq!(merged[0].display_name, "remote sonic");
        assert_eq!(merged[1].id, "claude-sonnet-4");
        assert!(!merged.iter().any(|m| m.id == "opencode/sonic"));
        assert_eq!(merged.len(), 2 + builtin_free_models().len() - 1);
    }

    #[test]
    fn test_merge_without_remote_is_free_set() {
        assert_eq!(merge_with_free(Vec::new()), builtin_free_models());
    }

    mod with_store {
        use super::*;
        use crate::test_utils::{harness, ScriptedClient};

        #[tokio::test]
        async fn test_without_key_serves_free_set() {
            let h = harness(ScriptedClient::default(), None);
            let list = h.catalog.list_models(false).await.unwrap();
            assert_eq!(list.models, builtin_free_models());
            assert!(list.advisory.is_none());
            assert!(list.models.iter().all(|m| m.is_free));
            assert_eq!(h.catalog.state().await, FetchState::Ready);
        }

        #[tokio::test]
        async fn test_without_key_and_free_mode_off_requires_auth() {
            let h = harness(ScriptedClient::default(), None);
            h.catalog.set_free_mode(false).await.unwrap();
            let err = h.catalog.list_models(false).await.unwrap_err();
            assert!(matches!(err, ZenError::AuthRequired(_)));
            assert_eq!(h.catalog.state().await, FetchState::Failed);
        }

        #[tokio::test]
        async fn test_default_model_fallbacks() {
            let h = harness(ScriptedClient::default(), None);
            assert_eq!(
                h.catalog.get_default_model().await.unwrap().as_deref(),
                Some(DEFAULT_FREE_MODEL_ID)
            );

            h.catalog.set_default_model(" opencode/glm-4.7 ").await.unwrap();
            assert_eq!(
                h.catalog.get_default_model().await.unwrap().as_deref(),
                Some("opencode/glm-4.7")
            );

            h.store.delete_setting(SETTING_DEFAULT_MODEL).unwrap();
            h.catalog.set_free_mode(false).await.unwrap();
            assert_eq!(h.catalog.get_default_model().await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_empty_default_model_is_rejected() {
            let h = harness(ScriptedClient::default(), None);
            let err = h.catalog.set_default_model("  ").await.unwrap_err();
            assert!(matches!(err, ZenError::InvalidInput(_)));
        }

        #[tokio::test]
        async fn test_free_mode_preference_survives_restart() {
            let h = harness(ScriptedClient::default(), None);
            h.catalog.set_free_mode(false).await.unwrap();

            let restarted = ModelCatalog::new(
                &CatalogConfig::default(),
                h.client.clone(),
                Arc::new(crate::credentials::StaticCredentials::none()),
                h.store.clone(),
                WorkerPool::new(1),
            );
            assert!(restarted.is_free_mode());
            restarted.restore_preferences().await.unwrap();
            assert!(!restarted.is_free_mode());
        }

        #[tokio::test]
        async fn test_lookups_over_free_set() {
            let h = harness(ScriptedClient::default(), None);

            let model = h.catalog.get_model("sonic-code").await.unwrap();
            assert_eq!(model.id, "opencode/sonic-code");
            assert!(h.catalog.get_model("missing").await.is_none());

            let unlisted = h.catalog.describe("openai/gpt-5").await;
            assert_eq!(unlisted.id, "openai/gpt-5");
            assert!(!unlisted.is_free);

            assert_eq!(h.catalog.models_by_provider("xAI").await.len(), 1);
            assert_eq!(h.catalog.free_models().await.len(), 7);
            let found = h.catalog.search_models("GLM").await;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, "opencode/glm-4.7");
        }
    }
}
