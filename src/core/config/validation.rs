use serde_json::{Map, Value};

use crate::core::errors::EngineError;

pub fn validate_config(config: &Value) -> Result<(), EngineError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    validate_optional_string_field(root, "vault_dir", "vault_dir")?;

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_u64_field(chat, "chat.max_tool_rounds", "max_tool_rounds", 1, 1_000)?;
        validate_u64_field(
            chat,
            "chat.output_token_reserve",
            "output_token_reserve",
            0,
            1_000_000,
        )?;
    }

    if let Some(apis) = expect_optional_object(root, "llm_apis")? {
        for (api_name, value) in apis {
            let path_prefix = format!("llm_apis.{}", api_name);
            let entry = value
                .as_object()
                .ok_or_else(|| config_type_error(&path_prefix, "object"))?;
            validate_required_string_field(
                entry,
                &format!("{}.interface", path_prefix),
                "interface",
            )?;
            validate_optional_string_field(entry, &format!("{}.api_url", path_prefix), "api_url")?;
        }
    }

    if let Some(llms) = root.get("llms") {
        let items = llms
            .as_array()
            .ok_or_else(|| config_type_error("llms", "array"))?;
        for (index, value) in items.iter().enumerate() {
            let path_prefix = format!("llms[{}]", index);
            let entry = value
                .as_object()
                .ok_or_else(|| config_type_error(&path_prefix, "object"))?;
            validate_required_string_field(
                entry,
                &format!("{}.model_name", path_prefix),
                "model_name",
            )?;
            validate_required_string_field(
                entry,
                &format!("{}.api_name", path_prefix),
                "api_name",
            )?;
            validate_u64_field(
                entry,
                &format!("{}.context_length", path_prefix),
                "context_length",
                1,
                100_000_000,
            )?;
        }
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_required_string_field(embedding, "embedding.name", "name")?;
        validate_required_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.dimensions", "dimensions", 1, 65_536)?;
    }

    if let Some(tokenizers) = expect_optional_object(root, "tokenizers")? {
        for (model_name, value) in tokenizers {
            if value.as_str().map(|s| s.trim().is_empty()).unwrap_or(true) {
                return Err(config_type_error(
                    &format!("tokenizers.{}", model_name),
                    "non-empty path",
                ));
            }
        }
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, EngineError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), EngineError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(EngineError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_required_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), EngineError> {
    let value = section.get(key).ok_or_else(|| {
        EngineError::Configuration(format!("Invalid config at '{}': value is required", path))
    })?;
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(EngineError::Configuration(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), EngineError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
}

fn config_type_error(path: &str, expected: &str) -> EngineError {
    EngineError::Configuration(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
