use crate::core::config::ChatSettings;
use crate::core::errors::EngineError;
use crate::history::ChatStore;
use crate::llm::service::DEFAULT_LLM_KEY;
use crate::llm::GenerationParams;

pub const GENERATION_PARAMS_KEY: &str = "llm_generation_parameters";
pub const MAX_TOOL_ROUNDS_KEY: &str = "max_tool_rounds";

/// User settings read once at the start of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    pub default_llm: Option<String>,
    pub params: GenerationParams,
    pub max_tool_rounds: usize,
    pub output_token_reserve: usize,
}

impl TurnSettings {
    pub async fn load(store: &dyn ChatStore, defaults: &ChatSettings) -> Result<Self, EngineError> {
        let default_llm = store
            .get_config(DEFAULT_LLM_KEY)
            .await?
            .and_then(|v| v.as_str().map(str::trim).map(str::to_string))
            .filter(|name| !name.is_empty());

        let params = match store.get_config(GENERATION_PARAMS_KEY).await? {
            Some(raw) => serde_json::from_value(raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed generation parameters: {}", e);
                GenerationParams::default()
            }),
            None => GenerationParams::default(),
        };

        let max_tool_rounds = store
            .get_config(MAX_TOOL_ROUNDS_KEY)
            .await?
            .and_then(|v| v.as_u64())
            .filter(|rounds| *rounds > 0)
            .map(|rounds| rounds as usize)
            .unwrap_or(defaults.max_tool_rounds);

        Ok(Self {
            default_llm,
            params,
            max_tool_rounds,
            output_token_reserve: defaults.output_token_reserve,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryChatStore;
    use serde_json::json;

    #[tokio::test]
    async fn falls_back_to_config_defaults() {
        let store = MemoryChatStore::new();
        let settings = TurnSettings::load(&store, &ChatSettings::default())
            .await
            .unwrap();
        assert_eq!(settings.default_llm, None);
        assert_eq!(settings.params, GenerationParams::default());
        assert_eq!(settings.max_tool_rounds, 25);
        assert_eq!(settings.output_token_reserve, 1024);
    }

    #[tokio::test]
    async fn reads_stored_values() {
        let store = MemoryChatStore::new();
        store.set_config(DEFAULT_LLM_KEY, json!("llama3")).await.unwrap();
        store
            .set_config(GENERATION_PARAMS_KEY, json!({ "max_tokens": 256, "temperature": 0.2 }))
            .await
            .unwrap();
        store.set_config(MAX_TOOL_ROUNDS_KEY, json!(3)).await.unwrap();

        let settings = TurnSettings::load(&store, &ChatSettings::default())
            .await
            .unwrap();
        assert_eq!(settings.default_llm.as_deref(), Some("llama3"));
        assert_eq!(settings.params.max_tokens, Some(256));
        assert_eq!(settings.params.temperature, Some(0.2));
        assert_eq!(settings.max_tool_rounds, 3);
    }

    #[tokio::test]
    async fn malformed_parameters_fall_back_to_defaults() {
        let store = MemoryChatStore::new();
        store
            .set_config(GENERATION_PARAMS_KEY, json!({ "max_tokens": "lots" }))
            .await
            .unwrap();
        store.set_config(MAX_TOOL_ROUNDS_KEY, json!(0)).await.unwrap();

        let settings = TurnSettings::load(&store, &ChatSettings::default())
            .await
            .unwrap();
        assert_eq!(settings.params, GenerationParams::default());
        assert_eq!(settings.max_tool_rounds, 25);
    }
}
