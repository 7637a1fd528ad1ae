use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::provider::{LlmProvider, StreamReceiver};
use super::types::{ApiConfig, ChatRequest, StreamEvent};
use crate::chat::{Message, Role, ToolCall};
use crate::core::errors::EngineError;
use crate::tools::ToolDefinition;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Key-based chat completion backend. Also serves any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
}

impl OpenAiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> &str {
        "openai"
    }

    async fn stream_chat(
        &self,
        api: &ApiConfig,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamReceiver, EngineError> {
        let base_url = api
            .api_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{}/chat/completions", base_url);

        let mut body = json!({
            "model": request.model,
            "messages": encode_messages(&request.messages),
            "stream": true,
        });
        if let Some(obj) = body.as_object_mut() {
            if !request.tools.is_empty() {
                obj.insert("tools".to_string(), encode_tools(&request.tools));
            }
            if let Some(t) = request.params.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.params.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = api.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let res = tokio::select! {
            _ = cancel.cancelled() => {
                let (_tx, rx) = mpsc::channel(1);
                return Ok(rx);
            }
            res = builder.send() => res.map_err(|e| EngineError::Stream(e.to_string()))?,
        };

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            if !request.tools.is_empty() && mentions_tool_support(&text) {
                return Err(EngineError::ToolsUnsupported(request.model));
            }
            return Err(EngineError::Stream(format!(
                "chat completion failed with {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut parser = SseParser::default();
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
                            let (events, done) = match parser.push_line(&line) {
                                Ok(parsed) => parsed,
                                Err(e) => {
                                    let _ = tx.send(Err(e)).await;
                                    return;
                                }
                            };
                            for event in events {
                                if cancel.is_cancelled() || tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                            }
                            if done {
                                break;
                            }
                        }
                        if parser.done {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::Stream(e.to_string()))).await;
                        return;
                    }
                }
            }

            for event in parser.finish() {
                if cancel.is_cancelled() || tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

fn mentions_tool_support(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("tool") && (lower.contains("support") || lower.contains("not allowed"))
}

/// Incremental parser for `data:` lines of a chat-completion event stream.
///
/// Text deltas are emitted as they arrive; tool-call fragments are merged by
/// index and emitted once the stream ends.
#[derive(Default)]
struct SseParser {
    calls: BTreeMap<u64, PartialToolCall>,
    done: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl SseParser {
    fn push_line(&mut self, line: &str) -> Result<(Vec<StreamEvent>, bool), EngineError> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok((Vec::new(), false));
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok((Vec::new(), true));
        }

        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("Skipping malformed stream line");
            return Ok((Vec::new(), false));
        };
        if let Some(message) = stream_error(&payload) {
            return Err(EngineError::Stream(message));
        }

        let mut events = Vec::new();
        let delta = &payload["choices"][0]["delta"];
        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                events.push(StreamEvent::Text(content.to_string()));
            }
        }
        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    entry.id.push_str(id);
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    entry.name.push_str(name);
                }
                if let Some(args) = fragment["function"]["arguments"].as_str() {
                    entry.arguments.push_str(args);
                }
            }
        }
        Ok((events, false))
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|call| {
                StreamEvent::ToolCall(ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
            })
            .collect()
    }
}

/// Extract the message of an in-band `error` event, if any.
fn stream_error(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    if error.is_null() {
        return None;
    }
    let message = match error {
        Value::String(message) => message.clone(),
        _ => error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    };
    Some(message)
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub(crate) fn encode_tools(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}

fn encode_messages(messages: &[Message]) -> Vec<Value> {
    let mut encoded = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::Tool => {
                for result in message.tool_results() {
                    encoded.push(json!({
                        "role": "tool",
                        "tool_call_id": result.tool_call_id,
                        "content": result.result.to_string(),
                    }));
                }
            }
            Role::Assistant => {
                let calls: Vec<Value> = message
                    .tool_calls()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let text = message.text();
                let mut entry = json!({ "role": "assistant", "content": text });
                if !calls.is_empty() {
                    entry["tool_calls"] = Value::Array(calls);
                    if text.is_empty() {
                        entry["content"] = Value::Null;
                    }
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
