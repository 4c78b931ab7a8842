mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{create_temp_storage, credentials};
use zenchat::catalog::{builtin_free_models, FetchState, ModelCatalog};
use zenchat::config::{CatalogConfig, ProviderConfig};
use zenchat::error::ErrorKind;
use zenchat::providers::{CompletionClient, ZenClient};
use zenchat::storage::{ConversationStore, SETTING_MODELS_CACHE};
use zenchat::sync::WorkerPool;

struct CatalogFixture {
    catalog: ModelCatalog,
    store: Arc<zenchat::storage::SqliteStorage>,
    _dir: tempfile::TempDir,
}

fn catalog_for(server: &MockServer, token: Option<&str>) -> CatalogFixture {
    let (store, dir) = create_temp_storage();
    let config = ProviderConfig {
        api_base: server.uri(),
        ..Default::default()
    };
    let client: Arc<dyn CompletionClient> = Arc::new(ZenClient::new(&config, 16).unwrap());
    let dyn_store: Arc<dyn ConversationStore> = store.clone();
    let catalog = ModelCatalog::new(
        &CatalogConfig::default(),
        client,
        credentials(token),
        dyn_store,
        WorkerPool::new(2),
    );
    CatalogFixture {
        catalog,
        store,
        _dir: dir,
    }
}

fn listing() -> serde_json::Value {
    json!({
        "object": "list",
        "data": [
            {
                "id": "claude-sonnet-4",
                "owned_by": "anthropic",
                "capabilities": { "stream": true, "tools": true, "vision": true },
                "pricing": { "prompt_tokens": "$3.00", "completion_tokens": "$15.00" }
            },
            {
                "id": "sonic",
                "owned_by": "opencode",
                "capabilities": { "stream": true, "tools": false, "vision": false },
                "pricing": { "prompt_tokens": "$0.00", "completion_tokens": "$0.00" }
            },
            {
                "id": "qwen3-coder",
                "owned_by": "alibaba",
                "capabilities": { "stream": true, "tools": true, "vision": false }
            }
        ]
    })
}

#[tokio::test]
async fn test_no_credential_returns_free_set_without_remote_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(0)
        .mount(&server)
        .await;

    let fx = catalog_for(&server, None);
    let list = fx.catalog.list_models(false).await.unwrap();

    assert_eq!(list.models, builtin_free_models());
    assert!(list.models.iter().all(|m| m.is_free));
    assert!(list.advisory.is_none());
}

#[tokio::test]
async fn test_unauthorized_falls_back_to_free_set_with_advisory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer sk-bad"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let fx = catalog_for(&server, Some("sk-bad"));
    let list = fx.catalog.list_models(false).await.unwrap();

    assert_eq!(list.models, builtin_free_models());
    let advisory = list.advisory.expect("advisory error");
    assert_eq!(advisory.kind(), ErrorKind::AuthRequired);
    assert_eq!(fx.catalog.state().await, FetchState::Degraded);
}

#[tokio::test]
async fn test_server_error_falls_back_to_free_set() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let fx = catalog_for(&server, Some("sk-test"));
    let list = fx.catalog.list_models(false).await.unwrap();

    assert_eq!(list.models, builtin_free_models());
    assert_eq!(list.advisory.unwrap().kind(), ErrorKind::ServerError);
}

#[tokio::test]
async fn test_remote_listing_is_merged_with_free_set() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(1)
        .mount(&server)
        .await;

    let fx = catalog_for(&server, Some("sk-test"));
    let list = fx.catalog.list_models(false).await.unwrap();
    assert!(list.advisory.is_none());
    assert_eq!(fx.catalog.state().await, FetchState::Ready);

    let models = list.models;
    // Remote sonic replaces the built-in opencode/sonic.
    assert_eq!(models.len(), 3 + builtin_free_models().len() - 1);
    assert_eq!(models.iter().filter(|m| m.canonical_id() == "sonic").count(), 1);

    let claude = models.iter().find(|m| m.id == "claude-sonnet-4").unwrap();
    assert!(!claude.is_free);
    assert_eq!(claude.pricing.prompt.unwrap().per_million(), 3.0);
    assert!(claude.capabilities.vision);

    let qwen = models.iter().find(|m| m.id == "qwen3-coder").unwrap();
    assert!(qwen.is_free, "absent pricing counts as free");

    let marker = fx.store.get_setting(SETTING_MODELS_CACHE).unwrap();
    assert!(marker.is_some());
    assert!(fx.catalog.last_fetched_at().await.unwrap().is_some());
}

#[tokio::test]
async fn test_cached_listing_is_reused_until_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(2)
        .mount(&server)
        .await;

    let fx = catalog_for(&server, Some("sk-test"));
    let first = fx.catalog.list_models(false).await.unwrap();
    assert!(!first.from_cache);

    let second = fx.catalog.list_models(false).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.models, first.models);

    let forced = fx.catalog.list_models(true).await.unwrap();
    assert!(!forced.from_cache);
}

#[tokio::test]
async fn test_invalidate_drops_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(2)
        .mount(&server)
        .await;

    let fx = catalog_for(&server, Some("sk-test"));
    fx.catalog.list_models(false).await.unwrap();
    fx.catalog.invalidate().await;
    let again = fx.catalog.list_models(false).await.unwrap();
    assert!(!again.from_cache);
}

#[tokio::test]
async fn test_describe_uses_fetched_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .mount(&server)
        .await;

    let fx = catalog_for(&server, Some("sk-test"));
    fx.catalog.list_models(false).await.unwrap();

    let sonic = fx.catalog.describe("opencode/sonic").await;
    assert_eq!(sonic.id, "sonic");
    assert!(sonic.is_free);
    assert_eq!(fx.catalog.models_by_provider("Anthropic").await.len(), 1);
}
