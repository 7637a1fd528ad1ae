use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("api not found: {0}")]
    ApiNotFound(String),
    #[error("api interface not supported: {0}")]
    UnsupportedInterface(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("schema mismatch on table {table}: expected {expected}, found {actual}")]
    SchemaMismatch {
        table: String,
        expected: String,
        actual: String,
    },
    #[error("storage error in {operation} on table {table}: {message}")]
    Storage {
        operation: &'static str,
        table: String,
        message: String,
    },
    #[error("retrieval failed in {operation}: {message}")]
    Retrieval {
        operation: &'static str,
        message: String,
    },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("tool calling not supported by model {0}")]
    ToolsUnsupported(String),
    #[error("duplicate tool call id: {0}")]
    DuplicateToolCall(String),
    #[error("tool `{tool}` failed: {message}")]
    ToolExecution { tool: String, message: String },
    #[error("tool loop did not settle after {0} rounds")]
    ToolLoopLimit(usize),
    #[error("persistence error in {operation}: {message}")]
    Persistence {
        operation: &'static str,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

const GENERIC_FAILURE_NOTICE: &str =
    "Something went wrong while generating a response. Your conversation was left unchanged.";

impl EngineError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        EngineError::Internal(err.to_string())
    }

    pub fn storage<E: std::fmt::Display>(operation: &'static str, table: &str, err: E) -> Self {
        EngineError::Storage {
            operation,
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    pub fn persistence<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        EngineError::Persistence {
            operation,
            message: err.to_string(),
        }
    }

    pub fn retrieval<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        EngineError::Retrieval {
            operation,
            message: err.to_string(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::ModelNotFound(_)
                | EngineError::ApiNotFound(_)
                | EngineError::UnsupportedInterface(_)
                | EngineError::Configuration(_)
        )
    }

    /// User-facing notice for this error.
    pub fn advisory(&self) -> String {
        match self {
            EngineError::ModelNotFound(name) => format!(
                "LLM {} is not configured. Please set up an LLM in settings.",
                name
            ),
            EngineError::ApiNotFound(name) => format!(
                "API {} is not configured. Please add it in settings.",
                name
            ),
            EngineError::UnsupportedInterface(kind) => {
                format!("API interface {} is not supported.", kind)
            }
            EngineError::Configuration(msg) => msg.clone(),
            EngineError::ToolsUnsupported(_) => tools_unsupported_advisory(),
            _ => GENERIC_FAILURE_NOTICE.to_string(),
        }
    }
}

pub fn tools_unsupported_advisory() -> String {
    "This model does not support tool calling. Tools were disabled for this chat. \
     To use tool calling, pick a model with tool support (for example a cloud LLM or a \
     local model tagged with tools)."
        .to_string()
}
