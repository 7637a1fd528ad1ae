//! Retrieval module.
//!
//! This module provides:
//! - per-corpus vector tables with schema checks (`table`, `sqlite`)
//! - the retrieval resolver that turns a query into grounding context
//! - the embedding function and document source the resolver calls out to

pub mod documents;
pub mod embedding;
pub mod fusion;
pub mod retrieval;
pub mod sqlite;
pub mod store;
pub mod table;

pub use documents::FsDocumentSource;
pub use embedding::RemoteEmbeddingFunction;
pub use retrieval::{format_context, RetrievalFilters, RetrievalResolver};
pub use sqlite::{VectorDb, VectorTable};
pub use store::{
    DateFilter, DocumentSource, EmbeddingFunction, RetrievalResult, SearchIndex, SearchMode,
    VectorEntry,
};
pub use table::{
    get_or_create_table, get_or_create_table_with_policy, table_name, MigrationPolicy,
    TableStatus,
};
