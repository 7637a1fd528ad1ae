use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::provider::{LlmProvider, StreamReceiver};
use super::service::{LlmService, ProviderRegistry};
use super::types::{ApiConfig, ChatRequest, LlmConfig, ProviderModel};
use crate::core::config::{AppPaths, ConfigService};
use crate::core::errors::EngineError;
use crate::history::MemoryChatStore;

struct LocalBackend {
    models: Vec<String>,
    deleted: Mutex<Vec<String>>,
    listings: Mutex<usize>,
}

#[async_trait]
impl LlmProvider for LocalBackend {
    fn kind(&self) -> &str {
        "local-test"
    }

    fn discovers_models(&self) -> bool {
        true
    }

    async fn list_models(&self, _api: &ApiConfig) -> Result<Vec<ProviderModel>, EngineError> {
        *self.listings.lock().unwrap() += 1;
        Ok(self
            .models
            .iter()
            .map(|id| ProviderModel {
                id: id.clone(),
                context_length: None,
            })
            .collect())
    }

    async fn delete_model(&self, _api: &ApiConfig, model: &str) -> Result<(), EngineError> {
        self.deleted.lock().unwrap().push(model.to_string());
        Ok(())
    }

    async fn stream_chat(
        &self,
        _api: &ApiConfig,
        _request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<StreamReceiver, EngineError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

fn service_in(dir: &Path, backend: Arc<LocalBackend>) -> (LlmService, ConfigService) {
    let config = ConfigService::new(Arc::new(AppPaths::with_root(dir)));
    config
        .update_config(
            json!({
                "llm_apis": {
                    "cloud": { "interface": "openai", "api_key": "sk-test" },
                    "local": { "interface": "local-test" },
                    "legacy": { "interface": "anthropic" }
                },
                "llms": [
                    { "model_name": "gpt-4o", "api_name": "cloud", "context_length": 128000 },
                    { "model_name": "orphan", "api_name": "missing", "context_length": 1000 },
                    { "model_name": "claude", "api_name": "legacy", "context_length": 200000 }
                ]
            }),
            true,
        )
        .unwrap();

    let mut providers = ProviderRegistry::with_defaults();
    providers.register(backend);
    (LlmService::new(config.clone(), providers), config)
}

fn local_backend(models: &[&str]) -> Arc<LocalBackend> {
    Arc::new(LocalBackend {
        models: models.iter().map(|m| m.to_string()).collect(),
        deleted: Mutex::new(Vec::new()),
        listings: Mutex::new(0),
    })
}

#[tokio::test]
async fn resolve_reports_distinct_configuration_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service_in(dir.path(), local_backend(&[]));

    let err = service.resolve("nope").await.err().unwrap();
    assert!(matches!(err, EngineError::ModelNotFound(name) if name == "nope"));

    let err = service.resolve("orphan").await.err().unwrap();
    assert!(matches!(err, EngineError::ApiNotFound(name) if name == "missing"));

    let err = service.resolve("claude").await.err().unwrap();
    assert!(matches!(err, EngineError::UnsupportedInterface(kind) if kind == "anthropic"));
}

#[tokio::test]
async fn resolve_returns_backend_and_fallback_tokenizer() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service_in(dir.path(), local_backend(&[]));

    let resolved = service.resolve("gpt-4o").await.unwrap();
    assert_eq!(resolved.provider.kind(), "openai");
    assert_eq!(resolved.api.api_key.as_deref(), Some("sk-test"));
    assert_eq!(resolved.config.context_length, 128000);
    assert_eq!(resolved.tokenizer.name(), "reference");
}

#[tokio::test]
async fn configured_models_resolve_without_querying_local_backends() {
    let dir = tempfile::tempdir().unwrap();
    let backend = local_backend(&["llama3"]);
    let (service, _) = service_in(dir.path(), backend.clone());

    service.resolve("gpt-4o").await.unwrap();
    assert_eq!(*backend.listings.lock().unwrap(), 0);

    let resolved = service.resolve("llama3").await.unwrap();
    assert_eq!(resolved.api.name, "local");
    assert_eq!(*backend.listings.lock().unwrap(), 1);
}

#[tokio::test]
async fn discovered_models_join_static_configs_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service_in(dir.path(), local_backend(&["llama3", "gpt-4o"]));

    let configs = service.all_llm_configs().await.unwrap();
    let names: Vec<&str> = configs.iter().map(|c| c.model_name.as_str()).collect();
    assert_eq!(names, vec!["gpt-4o", "orphan", "claude", "llama3"]);

    let llama = configs.iter().find(|c| c.model_name == "llama3").unwrap();
    assert_eq!(llama.api_name, "local");
    assert_eq!(llama.context_length, 4096);

    let resolved = service.resolve("llama3").await.unwrap();
    assert_eq!(resolved.provider.kind(), "local-test");
}

#[tokio::test]
async fn add_or_update_llm_validates_and_replaces() {
    let dir = tempfile::tempdir().unwrap();
    let (service, config) = service_in(dir.path(), local_backend(&[]));

    let err = service
        .add_or_update_llm(LlmConfig {
            model_name: " ".into(),
            api_name: "cloud".into(),
            context_length: 10,
        })
        .unwrap_err();
    assert!(err.is_configuration());

    let err = service
        .add_or_update_llm(LlmConfig {
            model_name: "m".into(),
            api_name: "cloud".into(),
            context_length: 0,
        })
        .unwrap_err();
    assert!(err.is_configuration());

    service
        .add_or_update_llm(LlmConfig {
            model_name: "gpt-4o".into(),
            api_name: "cloud".into(),
            context_length: 64000,
        })
        .unwrap();
    let app = config.app_config().unwrap();
    let gpt = app.llms.iter().find(|c| c.model_name == "gpt-4o").unwrap();
    assert_eq!(gpt.context_length, 64000);
    assert_eq!(app.llms.len(), 3);

    // secrets survive the rewrite
    assert_eq!(
        app.api_config("cloud").unwrap().api_key.as_deref(),
        Some("sk-test")
    );
}

#[tokio::test]
async fn remove_llm_deletes_local_models_from_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend = local_backend(&["llama3"]);
    let (service, config) = service_in(dir.path(), backend.clone());

    service.remove_llm("llama3").await.unwrap();
    assert_eq!(*backend.deleted.lock().unwrap(), vec!["llama3".to_string()]);

    service.remove_llm("gpt-4o").await.unwrap();
    let app = config.app_config().unwrap();
    assert!(app.llms.iter().all(|c| c.model_name != "gpt-4o"));
    assert_eq!(backend.deleted.lock().unwrap().len(), 1);

    let err = service.remove_llm("gpt-4o").await.unwrap_err();
    assert!(matches!(err, EngineError::ModelNotFound(_)));
}

#[tokio::test]
async fn default_llm_round_trips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service_in(dir.path(), local_backend(&[]));
    let store = MemoryChatStore::new();

    assert_eq!(service.default_llm(&store).await.unwrap(), None);
    assert!(service.set_default_llm(&store, "unknown").await.is_err());

    service.set_default_llm(&store, "gpt-4o").await.unwrap();
    assert_eq!(
        service.default_llm(&store).await.unwrap().as_deref(),
        Some("gpt-4o")
    );
}
