use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::openai::encode_tools;
use super::provider::{LlmProvider, StreamReceiver};
use super::types::{ApiConfig, ChatRequest, ProviderModel, StreamEvent};
use crate::chat::{Message, Role, ToolCall};
use crate::core::errors::EngineError;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Locally hosted backend whose models are enumerated live.
#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn base_url(api: &ApiConfig) -> String {
    api.api_url
        .as_deref()
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_string()
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn kind(&self) -> &str {
        "ollama"
    }

    fn discovers_models(&self) -> bool {
        true
    }

    async fn list_models(&self, api: &ApiConfig) -> Result<Vec<ProviderModel>, EngineError> {
        let url = format!("{}/api/tags", base_url(api));
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(EngineError::internal)?;

        if !res.status().is_success() {
            return Err(EngineError::Internal(format!(
                "Failed to list models: {}",
                res.status()
            )));
        }

        let response: TagsResponse = res.json().await.map_err(EngineError::internal)?;
        Ok(response
            .models
            .into_iter()
            .map(|m| ProviderModel {
                id: m.name,
                context_length: None,
            })
            .collect())
    }

    async fn delete_model(&self, api: &ApiConfig, model: &str) -> Result<(), EngineError> {
        let url = format!("{}/api/delete", base_url(api));
        let res = self
            .client
            .delete(&url)
            .json(&json!({ "name": model }))
            .send()
            .await
            .map_err(EngineError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(EngineError::Internal(format!(
                "Failed to delete model {}: {}",
                model, text
            )));
        }
        Ok(())
    }

    async fn stream_chat(
        &self,
        api: &ApiConfig,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamReceiver, EngineError> {
        let url = format!("{}/api/chat", base_url(api));

        let mut body = json!({
            "model": request.model,
            "messages": encode_messages(&request.messages),
            "stream": true,
        });
        if let Some(obj) = body.as_object_mut() {
            if !request.tools.is_empty() {
                obj.insert("tools".to_string(), encode_tools(&request.tools));
            }
            let mut options = serde_json::Map::new();
            if let Some(t) = request.params.temperature {
                options.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.params.max_tokens {
                options.insert("num_predict".to_string(), json!(t));
            }
            if !options.is_empty() {
                obj.insert("options".to_string(), Value::Object(options));
            }
        }

        let res = tokio::select! {
            _ = cancel.cancelled() => {
                let (_tx, rx) = mpsc::channel(1);
                return Ok(rx);
            }
            res = self.client.post(&url).json(&body).send() => {
                res.map_err(|e| EngineError::Stream(e.to_string()))?
            }
        };

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            if !request.tools.is_empty() && text.to_lowercase().contains("does not support tools") {
                return Err(EngineError::ToolsUnsupported(request.model));
            }
            return Err(EngineError::Stream(format!(
                "ollama chat failed with {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => return,
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };

                match item {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line);
                            match parse_line(&line) {
                                Ok(events) => {
                                    for event in events {
                                        if cancel.is_cancelled()
                                            || tx.send(Ok(event)).await.is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                                Err(err) => {
                                    let _ = tx.send(Err(err)).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::Stream(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Parse one NDJSON line of an `/api/chat` stream.
fn parse_line(line: &str) -> Result<Vec<StreamEvent>, EngineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let Ok(payload) = serde_json::from_str::<Value>(line) else {
        tracing::debug!("Skipping malformed ollama stream line");
        return Ok(Vec::new());
    };
    if let Some(error) = payload["error"].as_str() {
        return Err(EngineError::Stream(error.to_string()));
    }

    let mut events = Vec::new();
    let message = &payload["message"];
    if let Some(content) = message["content"].as_str() {
        if !content.is_empty() {
            events.push(StreamEvent::Text(content.to_string()));
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let function = &call["function"];
            let id = call["id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            events.push(StreamEvent::ToolCall(ToolCall {
                id,
                name: function["name"].as_str().unwrap_or_default().to_string(),
                arguments: function
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            }));
        }
    }
    Ok(events)
}

fn encode_messages(messages: &[Message]) -> Vec<Value> {
    let mut encoded = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::Tool => {
                for result in message.tool_results() {
                    encoded.push(json!({
                        "role": "tool",
                        "content": result.result.to_string(),
                    }));
                }
            }
            Role::Assistant => {
                let mut entry = json!({ "role": "assistant", "content": message.text() });
                let calls: Vec<Value> = message
                    .tool_calls()
                    .map(|call| {
                        json!({
                            "function": { "name": call.name, "arguments": call.arguments }
                        })
                    })
                    .collect();
                if !calls.is_empty() {
                    entry["tool_calls"] = Value::Array(calls);
                }
                encoded.push(entry);
            }
            Role::System | Role::User => encoded.push(json!({
                "role": message.role.as_str(),
                "content": message.text(),
            })),
        }
    }
    encoded
}
