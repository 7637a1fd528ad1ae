use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{string_arg, ToolDefinition, ToolExecutor};
use crate::core::errors::EngineError;
use crate::rag::{SearchIndex, SearchMode};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

pub fn search_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: "search".to_string(),
        description: "Semantically search the user's knowledge base".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to search for"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_LIMIT,
                    "description": "The number of results to return"
                }
            },
            "required": ["query"]
        }),
        auto_execute: true,
    }
}

/// Searches the vault's vector table.
pub struct SearchTool {
    index: Arc<dyn SearchIndex>,
    mode: SearchMode,
}

impl SearchTool {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            mode: SearchMode::Vector,
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl ToolExecutor for SearchTool {
    async fn execute(&self, arguments: &Value) -> Result<Value, EngineError> {
        let query = string_arg(arguments, "query").ok_or_else(|| EngineError::ToolExecution {
            tool: "search".to_string(),
            message: "Search query missing".to_string(),
        })?;
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| (v as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let results = self.index.search(query, limit, None, self.mode).await?;
        Ok(Value::Array(
            results
                .into_iter()
                .map(|r| json!({ "notepath": r.source_path, "content": r.content }))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{DateFilter, RetrievalResult};

    struct FixedIndex;

    #[async_trait]
    impl SearchIndex for FixedIndex {
        async fn search(
            &self,
            query: &str,
            limit: usize,
            _filter: Option<&DateFilter>,
            _mode: SearchMode,
        ) -> Result<Vec<RetrievalResult>, EngineError> {
            Ok((0..limit.min(3))
                .map(|i| RetrievalResult {
                    content: format!("{} #{}", query, i),
                    source_path: format!("note{}.md", i),
                    file_modified: None,
                    file_created: None,
                    score: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn returns_path_and_content_per_hit() {
        let tool = SearchTool::new(Arc::new(FixedIndex));
        let out = tool
            .execute(&json!({ "query": "rust", "limit": 2 }))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!([
                { "notepath": "note0.md", "content": "rust #0" },
                { "notepath": "note1.md", "content": "rust #1" }
            ])
        );
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let tool = SearchTool::new(Arc::new(FixedIndex));
        assert!(tool.execute(&json!({ "query": "  " })).await.is_err());
    }
}
