//! Conversation state: messages, chats and agent configuration.

pub mod agent;
pub mod message;
pub mod session;

pub use agent::{extract_file_references, AgentConfig, PromptMessage};
pub use message::{ContentPart, Message, MessageContent, Role, ToolCall, ToolResult};
pub use session::{Chat, ChatMetadata};
