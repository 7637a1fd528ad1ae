use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::provider::{LlmProvider, StreamReceiver};
use super::tokenizer::{Tokenizer, TokenizerRegistry};
use super::types::{ApiConfig, ChatRequest, LlmConfig, DEFAULT_CONTEXT_LENGTH};
use crate::core::config::ConfigService;
use crate::core::errors::EngineError;
use crate::history::ChatStore;

pub const DEFAULT_LLM_KEY: &str = "default_llm";

/// Lookup table from interface kind to backend implementation.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(OpenAiProvider::new()));
        registry.register(Arc::new(OllamaProvider::new()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.kind().to_string(), provider);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(kind).cloned()
    }
}

/// Everything needed to talk to one model.
#[derive(Clone)]
pub struct ResolvedModel {
    pub config: LlmConfig,
    pub api: ApiConfig,
    pub provider: Arc<dyn LlmProvider>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

impl ResolvedModel {
    pub async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamReceiver, EngineError> {
        self.provider.stream_chat(&self.api, request, cancel).await
    }
}

#[derive(Clone)]
pub struct LlmService {
    config: ConfigService,
    providers: ProviderRegistry,
}

impl LlmService {
    pub fn new(config: ConfigService, providers: ProviderRegistry) -> Self {
        Self { config, providers }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Statically configured models plus those discovered on local backends,
    /// unique by model name. Configured entries win.
    pub async fn all_llm_configs(&self) -> Result<Vec<LlmConfig>, EngineError> {
        let app = self.config.app_config()?;
        let mut configs = app.llms.clone();

        for api in app.api_configs() {
            let Some(provider) = self.providers.get(&api.interface) else {
                continue;
            };
            if !provider.discovers_models() {
                continue;
            }
            match provider.list_models(&api).await {
                Ok(models) => {
                    for model in models {
                        if configs.iter().any(|c| c.model_name == model.id) {
                            continue;
                        }
                        configs.push(LlmConfig {
                            model_name: model.id,
                            api_name: api.name.clone(),
                            context_length: model.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH),
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(api = %api.name, "Model discovery failed: {}", err);
                }
            }
        }

        Ok(configs)
    }

    pub async fn resolve(&self, model_name: &str) -> Result<ResolvedModel, EngineError> {
        let app = self.config.app_config()?;
        let configured = app.llms.iter().find(|c| c.model_name == model_name).cloned();
        let config = match configured {
            Some(config) => config,
            None => self
                .all_llm_configs()
                .await?
                .into_iter()
                .find(|c| c.model_name == model_name)
                .ok_or_else(|| EngineError::ModelNotFound(model_name.to_string()))?,
        };

        let api = app
            .api_config(&config.api_name)
            .ok_or_else(|| EngineError::ApiNotFound(config.api_name.clone()))?;

        let provider = self
            .providers
            .get(&api.interface)
            .ok_or_else(|| EngineError::UnsupportedInterface(api.interface.clone()))?;

        let tokenizer = TokenizerRegistry::new(app.tokenizers.clone()).resolve(model_name);

        tracing::debug!(model = %model_name, api = %api.name, "Resolved model backend");
        Ok(ResolvedModel {
            config,
            api,
            provider,
            tokenizer,
        })
    }

    pub fn add_or_update_llm(&self, llm: LlmConfig) -> Result<(), EngineError> {
        if llm.model_name.trim().is_empty() {
            return Err(EngineError::Configuration(
                "Model name is required".to_string(),
            ));
        }
        if llm.context_length == 0 {
            return Err(EngineError::Configuration(
                "Context length must be a positive number".to_string(),
            ));
        }

        let mut app = self.config.app_config()?;
        match app
            .llms
            .iter_mut()
            .find(|existing| existing.model_name == llm.model_name)
        {
            Some(existing) => *existing = llm,
            None => app.llms.push(llm),
        }
        self.config.save_app_config(&app)
    }

    /// Remove a model from configuration; local models are also deleted from
    /// their backend.
    pub async fn remove_llm(&self, model_name: &str) -> Result<(), EngineError> {
        let config = self
            .all_llm_configs()
            .await?
            .into_iter()
            .find(|c| c.model_name == model_name)
            .ok_or_else(|| EngineError::ModelNotFound(model_name.to_string()))?;

        let mut app = self.config.app_config()?;
        let before = app.llms.len();
        app.llms.retain(|c| c.model_name != model_name);
        if app.llms.len() != before {
            self.config.save_app_config(&app)?;
        }

        if let Some(api) = app.api_config(&config.api_name) {
            if let Some(provider) = self.providers.get(&api.interface) {
                if provider.discovers_models() {
                    provider.delete_model(&api, model_name).await?;
                }
            }
        }

        tracing::info!(model = %model_name, "Removed LLM");
        Ok(())
    }

    pub async fn set_default_llm(
        &self,
        store: &dyn ChatStore,
        model_name: &str,
    ) -> Result<(), EngineError> {
        let known = self
            .all_llm_configs()
            .await?
            .iter()
            .any(|c| c.model_name == model_name);
        if !known {
            return Err(EngineError::ModelNotFound(model_name.to_string()));
        }
        store
            .set_config(DEFAULT_LLM_KEY, Value::String(model_name.to_string()))
            .await
    }

    pub async fn default_llm(&self, store: &dyn ChatStore) -> Result<Option<String>, EngineError> {
        Ok(store
            .get_config(DEFAULT_LLM_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }
}
