use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{string_arg, ToolDefinition, ToolExecutor};
use crate::core::errors::EngineError;

pub fn create_note_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: "createNote".to_string(),
        description: "Create a new markdown note in the user's vault".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Relative path of the note, e.g. ideas/today.md"
                },
                "content": {
                    "type": "string",
                    "description": "Markdown content of the note"
                }
            },
            "required": ["filename", "content"]
        }),
        auto_execute: true,
    }
}

/// Writes notes inside the vault; paths that escape it are rejected.
pub struct CreateNoteTool {
    vault: PathBuf,
}

impl CreateNoteTool {
    pub fn new(vault: impl Into<PathBuf>) -> Self {
        Self {
            vault: vault.into(),
        }
    }

    fn note_path(&self, filename: &str) -> Result<PathBuf, EngineError> {
        let relative = Path::new(filename);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(EngineError::ToolExecution {
                tool: "createNote".to_string(),
                message: format!("note path must stay inside the vault: {}", filename),
            });
        }

        let mut path = self.vault.join(relative);
        if path.extension().is_none() {
            path.set_extension("md");
        }
        Ok(path)
    }
}

#[async_trait]
impl ToolExecutor for CreateNoteTool {
    async fn execute(&self, arguments: &Value) -> Result<Value, EngineError> {
        let filename = string_arg(arguments, "filename").ok_or_else(|| EngineError::ToolExecution {
            tool: "createNote".to_string(),
            message: "filename missing".to_string(),
        })?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let path = self.note_path(filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::persistence("create_note", e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| EngineError::persistence("create_note", e))?;

        tracing::info!(path = %path.display(), "Created note");
        Ok(json!({ "created": path.to_string_lossy() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_markdown_inside_vault() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CreateNoteTool::new(dir.path());
        tool.execute(&json!({ "filename": "ideas/today", "content": "# Today" }))
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("ideas/today.md")).unwrap();
        assert_eq!(written, "# Today");
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CreateNoteTool::new(dir.path());
        for filename in ["../outside.md", "/etc/passwd"] {
            let err = tool
                .execute(&json!({ "filename": filename, "content": "x" }))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::ToolExecution { .. }));
        }
    }
}
