//! Retrieval-augmented chat engine for a personal notes vault.

pub mod agent;
pub mod chat;
pub mod context;
pub mod core;
pub mod history;
pub mod llm;
pub mod rag;
pub mod tools;
pub mod vector_math;

pub use crate::core::errors::EngineError;
