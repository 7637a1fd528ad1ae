//! Tool definitions and the executor registry.
//!
//! The orchestrator only sees names, JSON-schema parameters and opaque JSON
//! results; what a tool does is up to its executor.

pub mod notes;
pub mod search;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::ToolCall;
use crate::core::errors::EngineError;

pub use notes::{create_note_tool_definition, CreateNoteTool};
pub use search::{search_tool_definition, SearchTool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the call arguments.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    /// When false the call waits for explicit approval.
    #[serde(default = "default_auto_execute")]
    pub auto_execute: bool,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn default_auto_execute() -> bool {
    true
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: &Value) -> Result<Value, EngineError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(name.into(), executor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Validate the call against its definition (when known) and run it.
    pub async fn execute(
        &self,
        definition: Option<&ToolDefinition>,
        call: &ToolCall,
    ) -> Result<Value, EngineError> {
        let executor = self
            .executors
            .get(&call.name)
            .ok_or_else(|| EngineError::ToolExecution {
                tool: call.name.clone(),
                message: "no executor registered".to_string(),
            })?;

        if let Some(definition) = definition {
            validate_arguments(&call.name, &definition.parameters, &call.arguments)?;
        }

        tracing::info!(tool = %call.name, call_id = %call.id, "Executing tool");
        executor
            .execute(&call.arguments)
            .await
            .map_err(|err| match err {
                err @ EngineError::ToolExecution { .. } => err,
                other => EngineError::ToolExecution {
                    tool: call.name.clone(),
                    message: other.to_string(),
                },
            })
    }
}

pub fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<(), EngineError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| EngineError::ToolExecution {
        tool: tool.to_string(),
        message: format!("invalid parameter schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        return Ok(());
    }
    Err(EngineError::ToolExecution {
        tool: tool.to_string(),
        message: format!("invalid arguments: {}", errors.join("; ")),
    })
}

/// String argument helper shared by the built-in tools.
pub(crate) fn string_arg<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
