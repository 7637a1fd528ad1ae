use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::store::EmbeddingFunction;
use crate::core::config::EmbeddingConfig;
use crate::core::errors::EngineError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Embedding function served by an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct RemoteEmbeddingFunction {
    config: EmbeddingConfig,
    client: Client,
}

impl RemoteEmbeddingFunction {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingFunction for RemoteEmbeddingFunction {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let base_url = self
            .config
            .api_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{}/embeddings", base_url);

        let mut builder = self.client.post(&url).json(&json!({
            "model": self.config.model,
            "input": texts,
        }));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let res = builder
            .send()
            .await
            .map_err(|e| EngineError::retrieval("embed", e))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(EngineError::retrieval(
                "embed",
                format!("embedding endpoint returned {}: {}", status, text),
            ));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| EngineError::retrieval("embed", e))?;
        let embeddings = parse_embeddings(&payload);
        if embeddings.len() != texts.len() {
            return Err(EngineError::retrieval(
                "embed",
                format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    embeddings.len()
                ),
            ));
        }
        Ok(embeddings)
    }
}

/// Vectors from a `{"data": [{"index": n, "embedding": [...]}]}` payload, in index order.
fn parse_embeddings(payload: &Value) -> Vec<Vec<f32>> {
    let Some(data) = payload["data"].as_array() else {
        return Vec::new();
    };
    let mut indexed: Vec<(u64, Vec<f32>)> = data
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let values = item["embedding"].as_array()?;
            let vector = values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            let index = item["index"].as_u64().unwrap_or(position as u64);
            Some((index, vector))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, vector)| vector).collect()
}
