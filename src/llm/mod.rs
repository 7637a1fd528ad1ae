pub mod ollama;
pub mod openai;
pub mod provider;
pub mod service;
pub mod tokenizer;
pub mod types;

#[cfg(test)]
mod tests;

pub use provider::{LlmProvider, StreamReceiver};
pub use service::{LlmService, ProviderRegistry, ResolvedModel};
pub use tokenizer::{ReferenceTokenizer, Tokenizer, TokenizerRegistry};
pub use types::{ApiConfig, ChatRequest, GenerationParams, LlmConfig, StreamEvent};
