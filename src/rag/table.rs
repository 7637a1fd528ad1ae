//! Vector table naming, schema and lifecycle.
//!
//! One table exists per (embedding function, corpus path) pair. The table's
//! on-disk schema must match the schema implied by the embedding function
//! currently configured; a mismatch recreates the table empty and the
//! ingestion side is expected to re-index it.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::sqlite::{VectorDb, VectorTable};
use super::store::EmbeddingFunction;
use crate::core::errors::EngineError;

pub const TABLE_PREFIX: &str = "ragnote_table_";

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("sanitizer pattern is valid"));

/// Replace filesystem-unsafe characters with `_`.
pub fn sanitize_component(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "_").into_owned()
}

/// Deterministic table name for an embedding function and corpus path.
pub fn table_name(embedding_name: &str, corpus_path: &str) -> String {
    format!(
        "{}{}_{}",
        TABLE_PREFIX,
        sanitize_component(embedding_name),
        sanitize_component(corpus_path)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
}

impl ColumnSpec {
    fn new(name: &str, sql_type: impl Into<String>, not_null: bool) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.into(),
            not_null,
        }
    }
}

/// Columns implied by an embedding width. The vector width is part of the
/// declared type so the schema string changes with the embedding function.
pub fn table_schema(dimensions: usize) -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("notepath", "TEXT", false),
        ColumnSpec::new("vector", format!("VECTOR({})", dimensions), true),
        ColumnSpec::new("content", "TEXT", false),
        ColumnSpec::new("subnoteindex", "INTEGER", false),
        ColumnSpec::new("timeadded", "TEXT", false),
        ColumnSpec::new("filemodified", "TEXT", false),
        ColumnSpec::new("filecreated", "TEXT", false),
    ]
}

pub fn canonical_schema(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| {
            format!(
                "{}:{}:{}",
                c.name,
                c.sql_type.to_uppercase(),
                if c.not_null { 1 } else { 0 }
            )
        })
        .collect::<Vec<_>>()
        .join("|")
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// What to do when an existing table's schema differs from the intended one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationPolicy {
    /// Drop the table, discarding its vectors, and create it empty.
    #[default]
    DropAndRecreate,
    /// Fail with `EngineError::SchemaMismatch` and leave the table untouched.
    Refuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    Opened,
    /// Dropped and recreated empty; needs a full re-index.
    Recreated,
}

pub async fn get_or_create_table(
    db: &VectorDb,
    embedding: Arc<dyn EmbeddingFunction>,
    corpus_path: &str,
) -> Result<VectorTable, EngineError> {
    get_or_create_table_with_policy(db, embedding, corpus_path, MigrationPolicy::default()).await
}

pub async fn get_or_create_table_with_policy(
    db: &VectorDb,
    embedding: Arc<dyn EmbeddingFunction>,
    corpus_path: &str,
    policy: MigrationPolicy,
) -> Result<VectorTable, EngineError> {
    let name = table_name(embedding.name(), corpus_path);
    let columns = table_schema(embedding.dimensions());
    let intended = canonical_schema(&columns);

    let status = match db.schema_string(&name).await? {
        None => {
            db.create_table(&name, &columns, false).await?;
            tracing::info!(table = %name, "Created vector table");
            TableStatus::Created
        }
        Some(actual) if actual == intended => TableStatus::Opened,
        Some(actual) => match policy {
            MigrationPolicy::Refuse => {
                return Err(EngineError::SchemaMismatch {
                    table: name,
                    expected: intended,
                    actual,
                });
            }
            MigrationPolicy::DropAndRecreate => {
                tracing::warn!(
                    table = %name,
                    old_schema = %actual,
                    new_schema = %intended,
                    "Vector table schema changed; dropping existing vectors and recreating table"
                );
                db.create_table(&name, &columns, true).await?;
                TableStatus::Recreated
            }
        },
    };

    Ok(VectorTable::new(db.clone(), name, embedding, status))
}
