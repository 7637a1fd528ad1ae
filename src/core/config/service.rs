use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::validation::validate_config;
use crate::core::errors::EngineError;
use crate::llm::types::{ApiConfig, LlmConfig};

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "access_key",
    "bearer",
    "auth_",
];

const SENSITIVE_WHITELIST: [&str; 4] = ["max_tokens", "output_token_reserve", "tokenizers", "tokens"];

/// Settings for the embedding endpoint used to index and query the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub name: String,
    pub model: String,
    pub dimensions: usize,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub max_tool_rounds: usize,
    pub output_token_reserve: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 25,
            output_token_reserve: 1024,
        }
    }
}

/// Typed view over the merged YAML configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub vault_dir: Option<PathBuf>,
    pub llm_apis: BTreeMap<String, ApiConfig>,
    pub llms: Vec<LlmConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub chat: ChatSettings,
    pub tokenizers: BTreeMap<String, PathBuf>,
}

impl AppConfig {
    pub fn api_configs(&self) -> Vec<ApiConfig> {
        self.llm_apis
            .iter()
            .map(|(name, api)| ApiConfig {
                name: name.clone(),
                ..api.clone()
            })
            .collect()
    }

    pub fn api_config(&self, name: &str) -> Option<ApiConfig> {
        self.llm_apis.get(name).map(|api| ApiConfig {
            name: name.to_string(),
            ..api.clone()
        })
    }
}

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("RAGNOTE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        self.paths.config_path.clone()
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    pub fn load_config(&self) -> Result<Value, EngineError> {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        Ok(deep_merge(&public_config, &secrets_config))
    }

    pub fn app_config(&self) -> Result<AppConfig, EngineError> {
        let raw = self.load_config()?;
        validate_config(&raw)?;
        serde_json::from_value(raw).map_err(|e| EngineError::Configuration(e.to_string()))
    }

    pub fn update_config(&self, config_data: Value, merge: bool) -> Result<(), EngineError> {
        let current = self.load_config()?;
        let restored = restore_redacted_values(&config_data, &current);
        let to_save = if merge {
            deep_merge(&current, &restored)
        } else {
            restored
        };

        validate_config(&to_save)?;
        self.save_config_files(&to_save)
    }

    pub fn save_app_config(&self, config: &AppConfig) -> Result<(), EngineError> {
        let value = serde_json::to_value(config).map_err(EngineError::internal)?;
        self.update_config(strip_nulls(value), false)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }

    fn save_config_files(&self, config: &Value) -> Result<(), EngineError> {
        let (public_config, secrets_config) = split_config(config);
        write_yaml_file(&self.config_path(), &public_config)?;
        write_yaml_file(&self.secrets_path(), &secrets_config)
    }
}

fn load_yaml_file(path: &Path) -> Value {
    let Ok(contents) = fs::read_to_string(path) else {
        return Value::Object(Map::new());
    };
    match serde_yaml::from_str::<Value>(&contents) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => Value::Object(Map::new()),
        Err(err) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable config file: {}", err);
            Value::Object(Map::new())
        }
    }
}

fn write_yaml_file(path: &Path, value: &Value) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let yaml = serde_yaml::to_string(value).map_err(EngineError::internal)?;
    fs::write(path, yaml).map_err(|e| EngineError::persistence("write_config", e))
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

fn split_config(config: &Value) -> (Value, Value) {
    let Value::Object(map) = config else {
        return (config.clone(), Value::Object(Map::new()));
    };

    let mut public_map = Map::new();
    let mut secret_map = Map::new();

    for (key, value) in map {
        if value.is_object() {
            let (public_sub, secret_sub) = split_config(value);
            if !is_empty_object(&public_sub) {
                public_map.insert(key.clone(), public_sub);
            }
            if !is_empty_object(&secret_sub) {
                secret_map.insert(key.clone(), secret_sub);
            }
        } else if is_sensitive_key(key) && !value.is_null() {
            secret_map.insert(key.clone(), value.clone());
        } else {
            public_map.insert(key.clone(), value.clone());
        }
    }

    (Value::Object(public_map), Value::Object(secret_map))
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    if is_sensitive_key(key) && !val.is_null() {
                        (key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()))
                    } else {
                        (key.clone(), redact_sensitive_values(val))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn restore_redacted_values(new_value: &Value, original: &Value) -> Value {
    match new_value {
        Value::Object(map) => {
            let original_map = original.as_object();
            let mut restored = Map::new();
            for (key, value) in map {
                let orig_val = original_map.and_then(|m| m.get(key));
                if value.as_str() == Some(REDACT_PLACEHOLDER) {
                    if let Some(orig) = orig_val {
                        restored.insert(key.clone(), orig.clone());
                    }
                    continue;
                }
                restored.insert(
                    key.clone(),
                    restore_redacted_values(value, orig_val.unwrap_or(&Value::Null)),
                );
            }
            Value::Object(restored)
        }
        Value::Array(items) => {
            let original_items = original.as_array();
            Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| {
                        let orig = original_items
                            .and_then(|o| o.get(idx))
                            .unwrap_or(&Value::Null);
                        restore_redacted_values(item, orig)
                    })
                    .collect(),
            )
        }
        _ => new_value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST.iter().any(|allowed| *allowed == key_lower) {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_in(dir: &Path) -> ConfigService {
        ConfigService::new(Arc::new(AppPaths::with_root(dir)))
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({ "a": 1, "b": { "c": 2, "d": 3 } });
        let merged = deep_merge(&base, &json!({ "b": { "c": 99 }, "e": "x" }));
        assert_eq!(merged, json!({ "a": 1, "b": { "c": 99, "d": 3 }, "e": "x" }));
    }

    #[test]
    fn api_keys_are_written_to_the_secrets_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());

        service
            .update_config(
                json!({
                    "llm_apis": { "openai": { "interface": "openai", "api_key": "sk-live" } },
                    "chat": { "output_token_reserve": 256 }
                }),
                true,
            )
            .unwrap();

        let public = fs::read_to_string(service.config_path()).unwrap();
        let secrets = fs::read_to_string(service.secrets_path()).unwrap();
        assert!(!public.contains("sk-live"));
        assert!(secrets.contains("sk-live"));
        assert!(public.contains("output_token_reserve"));

        let config = service.app_config().unwrap();
        let api = config.api_config("openai").unwrap();
        assert_eq!(api.name, "openai");
        assert_eq!(api.api_key.as_deref(), Some("sk-live"));
    }

    #[test]
    fn redacted_placeholders_restore_original_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());
        service
            .update_config(
                json!({ "llm_apis": { "openai": { "interface": "openai", "api_key": "sk-1" } } }),
                true,
            )
            .unwrap();

        let redacted = service.redact_sensitive_values(&service.load_config().unwrap());
        assert_eq!(redacted["llm_apis"]["openai"]["api_key"], json!("****"));

        service.update_config(redacted, false).unwrap();
        let config = service.app_config().unwrap();
        assert_eq!(
            config.api_config("openai").unwrap().api_key.as_deref(),
            Some("sk-1")
        );
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = service_in(dir.path()).app_config().unwrap();
        assert!(config.llms.is_empty());
        assert_eq!(config.chat.max_tool_rounds, 25);
    }
}
