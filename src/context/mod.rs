//! Context management module.
//!
//! Provides token-aware slicing of retrieved context.

mod window;

pub use window::{context_budget, slice_list_to_context_length, slice_to_context_length};
