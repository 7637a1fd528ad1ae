use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentConfig;
use super::message::{Message, Role, ToolCall, ToolResult};
use crate::core::errors::EngineError;
use crate::tools::ToolDefinition;

const MAX_DISPLAY_NAME_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub id: String,
    pub display_name: String,
    pub time_of_last_message: DateTime<Utc>,
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub display_name: String,
    pub time_of_last_message: DateTime<Utc>,
    #[serde(default)]
    pub tool_definitions: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

impl Chat {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            display_name: String::new(),
            time_of_last_message: Utc::now(),
            tool_definitions: Vec::new(),
            agent: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn metadata(&self) -> ChatMetadata {
        ChatMetadata {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            time_of_last_message: self.time_of_last_message,
        }
    }

    pub fn touch(&mut self) {
        self.time_of_last_message = Utc::now();
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        if self.display_name.is_empty() {
            self.refresh_display_name();
        }
        self.touch();
    }

    /// First user message's visible text, trimmed and capped.
    pub fn refresh_display_name(&mut self) {
        if let Some(first) = self.messages.iter().find(|m| m.role == Role::User) {
            self.display_name = first
                .display_text()
                .trim()
                .chars()
                .take(MAX_DISPLAY_NAME_CHARS)
                .collect();
        }
    }

    pub fn tool_definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tool_definitions.iter().find(|d| d.name == name)
    }

    /// Append a streamed chunk to the trailing assistant message.
    pub fn append_text(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.trailing_assistant().push_text(delta);
        self.touch();
    }

    /// Record the tool calls of one stream. Ids must be unique within the
    /// chat; on a duplicate nothing is appended.
    pub fn append_tool_calls(&mut self, calls: Vec<ToolCall>) -> Result<(), EngineError> {
        if calls.is_empty() {
            return Ok(());
        }
        let mut seen: HashSet<String> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_calls().map(|c| c.id.clone()))
            .collect();
        for call in &calls {
            if !seen.insert(call.id.clone()) {
                return Err(EngineError::DuplicateToolCall(call.id.clone()));
            }
        }

        let message = self.trailing_assistant();
        for call in calls {
            message.push_tool_call(call);
        }
        self.touch();
        Ok(())
    }

    pub fn has_tool_result(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(|m| m.tool_results())
            .any(|r| r.tool_call_id == call_id)
    }

    /// Tool calls without a matching result, in call order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_results())
            .map(|r| r.tool_call_id.as_str())
            .collect();
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls())
            .filter(|c| !answered.contains(c.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn append_tool_result(&mut self, result: ToolResult) -> Result<(), EngineError> {
        if self.has_tool_result(&result.tool_call_id) {
            return Err(EngineError::DuplicateToolCall(result.tool_call_id));
        }
        self.messages.push(Message::tool_result(result));
        self.touch();
        Ok(())
    }

    /// History to send to a backend: tool calls without a result are
    /// removed, and assistant messages left empty by that are dropped.
    pub fn messages_for_backend(&self) -> Vec<Message> {
        let answered: HashSet<String> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_results())
            .map(|r| r.tool_call_id.clone())
            .collect();

        self.messages
            .iter()
            .filter_map(|message| {
                if message.role != Role::Assistant || message.tool_calls().next().is_none() {
                    return Some(message.clone());
                }
                let mut message = message.clone();
                message.retain_tool_calls(|id| answered.contains(id));
                (!message.is_empty()).then_some(message)
            })
            .collect()
    }

    fn trailing_assistant(&mut self) -> &mut Message {
        let needs_new = self
            .messages
            .last()
            .map_or(true, |m| m.role != Role::Assistant);
        if needs_new {
            self.messages.push(Message::assistant(""));
        }
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }
}
