//! SQLite-backed vector tables.
//!
//! Vectors are stored as little-endian f32 blobs and searched with
//! brute-force cosine similarity.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use super::fusion::{rrf_fuse, RRF_K};
use super::store::{
    format_timestamp, parse_timestamp, DateFilter, EmbeddingFunction, RetrievalResult,
    SearchIndex, SearchMode, VectorEntry,
};
use super::table::{canonical_schema, quote_ident, ColumnSpec, TableStatus};
use crate::core::errors::EngineError;
use crate::vector_math::rank_descending_by_cosine;

const ROW_COLUMNS: &str =
    "rowid, notepath, vector, content, subnoteindex, timeadded, filemodified, filecreated";

/// Connection to the database holding every vector table.
#[derive(Clone)]
pub struct VectorDb {
    pool: SqlitePool,
}

impl VectorDb {
    pub async fn open(db_path: &Path) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::storage("connect", &db_path.display().to_string(), e))?;

        Ok(Self { pool })
    }

    /// Canonical schema of `table`, or `None` when it does not exist.
    pub async fn schema_string(&self, table: &str) -> Result<Option<String>, EngineError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::storage("open_table", table, e))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let columns: Vec<ColumnSpec> = rows
            .iter()
            .map(|row| ColumnSpec {
                name: row.get("name"),
                sql_type: row.get("type"),
                not_null: row.get::<i64, _>("notnull") != 0,
            })
            .collect();
        Ok(Some(canonical_schema(&columns)))
    }

    /// Create `table`; with `replace` any existing table is dropped first in
    /// the same transaction.
    pub(crate) async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        replace: bool,
    ) -> Result<(), EngineError> {
        let operation = if replace { "recreate_table" } else { "create_table" };
        let column_sql = columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}{}",
                    quote_ident(&c.name),
                    c.sql_type,
                    if c.not_null { " NOT NULL" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::storage(operation, table, e))?;

        if replace {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::storage(operation, table, e))?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            column_sql
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::storage(operation, table, e))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (notepath)",
            quote_ident(&format!("{}_notepath", table)),
            quote_ident(table)
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::storage(operation, table, e))?;

        tx.commit()
            .await
            .map_err(|e| EngineError::storage(operation, table, e))
    }
}

/// An opened vector table bound to the embedding function it was checked against.
#[derive(Clone)]
pub struct VectorTable {
    db: VectorDb,
    name: String,
    embedding: Arc<dyn EmbeddingFunction>,
    status: TableStatus,
}

impl std::fmt::Debug for VectorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorTable")
            .field("name", &self.name)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl VectorTable {
    pub(crate) fn new(
        db: VectorDb,
        name: String,
        embedding: Arc<dyn EmbeddingFunction>,
        status: TableStatus,
    ) -> Self {
        Self {
            db,
            name,
            embedding,
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TableStatus {
        self.status
    }

    pub fn dimensions(&self) -> usize {
        self.embedding.dimensions()
    }

    pub async fn schema_string(&self) -> Result<String, EngineError> {
        self.db.schema_string(&self.name).await?.ok_or_else(|| {
            EngineError::storage("schema", &self.name, "table no longer exists")
        })
    }

    pub async fn add(&self, entries: Vec<VectorEntry>) -> Result<usize, EngineError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let width = self.dimensions();
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != width) {
            return Err(EngineError::storage(
                "add",
                &self.name,
                format!(
                    "vector for {} has width {}, table expects {}",
                    bad.notepath,
                    bad.vector.len(),
                    width
                ),
            ));
        }

        let sql = format!(
            "INSERT INTO {} (notepath, vector, content, subnoteindex, timeadded, filemodified, filecreated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            quote_ident(&self.name)
        );
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::storage("add", &self.name, e))?;

        for entry in &entries {
            sqlx::query(&sql)
                .bind(&entry.notepath)
                .bind(serialize_vector(&entry.vector))
                .bind(&entry.content)
                .bind(entry.subnoteindex)
                .bind(format_timestamp(&entry.timeadded))
                .bind(entry.filemodified.as_ref().map(format_timestamp))
                .bind(entry.filecreated.as_ref().map(format_timestamp))
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::storage("add", &self.name, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::storage("add", &self.name, e))?;
        Ok(entries.len())
    }

    pub async fn delete_by_path(&self, notepath: &str) -> Result<usize, EngineError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE notepath = ?1",
            quote_ident(&self.name)
        ))
        .bind(notepath)
        .execute(&self.db.pool)
        .await
        .map_err(|e| EngineError::storage("delete", &self.name, e))?;

        Ok(result.rows_affected() as usize)
    }

    pub async fn count(&self) -> Result<usize, EngineError> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&self.name)))
                .fetch_one(&self.db.pool)
                .await
                .map_err(|e| EngineError::storage("count", &self.name, e))?;
        Ok(count as usize)
    }

    async fn fetch_rows(
        &self,
        extra_clause: Option<&str>,
        extra_binds: &[String],
        filter: Option<&DateFilter>,
    ) -> Result<Vec<SqliteRow>, EngineError> {
        let mut clauses = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(clause) = extra_clause {
            clauses.push(format!("({})", clause));
            binds.extend_from_slice(extra_binds);
        }
        if let Some(filter) = filter {
            let (clause, filter_binds) = filter.to_sql();
            if !clause.is_empty() {
                clauses.push(clause);
                binds.extend(filter_binds);
            }
        }

        let mut sql = format!("SELECT {} FROM {}", ROW_COLUMNS, quote_ident(&self.name));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        query
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| EngineError::storage("search", &self.name, e))
    }

    async fn vector_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&DateFilter>,
    ) -> Result<Vec<(i64, RetrievalResult)>, EngineError> {
        let embedded = self.embedding.embed(&[query.to_string()]).await?;
        let query_vector = embedded.into_iter().next().ok_or_else(|| {
            EngineError::storage("embed", &self.name, "embedding function returned no vector")
        })?;
        if query_vector.len() != self.dimensions() {
            return Err(EngineError::storage(
                "embed",
                &self.name,
                format!(
                    "query vector has width {}, table expects {}",
                    query_vector.len(),
                    self.dimensions()
                ),
            ));
        }

        let rows = self.fetch_rows(None, &[], filter).await?;
        let (rows, vectors): (Vec<&SqliteRow>, Vec<Vec<f32>>) = rows
            .iter()
            .filter_map(|row| {
                let bytes: Vec<u8> = row.get("vector");
                let vector = deserialize_vector(&bytes);
                (vector.len() == query_vector.len()).then_some((row, vector))
            })
            .unzip();

        let ranked = rank_descending_by_cosine(&query_vector, &vectors)?;
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(idx, score)| {
                let (rowid, mut result) = row_to_result(rows[idx]);
                result.score = Some(score);
                (rowid, result)
            })
            .collect())
    }

    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&DateFilter>,
    ) -> Result<Vec<(i64, RetrievalResult)>, EngineError> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let clause = vec!["content LIKE ? ESCAPE '\\'"; terms.len()].join(" OR ");
        let patterns: Vec<String> = terms
            .iter()
            .map(|t| format!("%{}%", escape_like(t)))
            .collect();
        let rows = self.fetch_rows(Some(&clause), &patterns, filter).await?;

        let mut scored: Vec<(usize, usize, i64, RetrievalResult)> = rows
            .iter()
            .map(|row| {
                let (rowid, mut result) = row_to_result(row);
                let lower = result.content.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                let occurrences = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
                result.score = Some(matched as f32 / terms.len() as f32);
                (matched, occurrences, rowid, result)
            })
            .filter(|(matched, ..)| *matched > 0)
            .collect();

        // stable: ties keep insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, rowid, result)| (rowid, result))
            .collect())
    }
}

#[async_trait]
impl SearchIndex for VectorTable {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&DateFilter>,
        mode: SearchMode,
    ) -> Result<Vec<RetrievalResult>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        tracing::debug!(table = %self.name, ?mode, limit, "Searching vector table");

        let hits = match mode {
            SearchMode::Vector => self.vector_search(query, limit, filter).await?,
            SearchMode::Text => self.text_search(query, limit, filter).await?,
            SearchMode::Hybrid => {
                let candidates = limit.saturating_mul(2);
                let vector = self.vector_search(query, candidates, filter).await?;
                let text = self.text_search(query, candidates, filter).await?;
                rrf_fuse(vec![vector, text], |(rowid, _)| *rowid, RRF_K, limit)
                    .into_iter()
                    .map(|((rowid, mut result), fused)| {
                        result.score = Some(fused);
                        (rowid, result)
                    })
                    .collect()
            }
        };

        Ok(hits.into_iter().map(|(_, result)| result).collect())
    }
}

fn row_to_result(row: &SqliteRow) -> (i64, RetrievalResult) {
    let modified: Option<String> = row.get("filemodified");
    let created: Option<String> = row.get("filecreated");
    let result = RetrievalResult {
        content: row.get::<Option<String>, _>("content").unwrap_or_default(),
        source_path: row.get::<Option<String>, _>("notepath").unwrap_or_default(),
        file_modified: modified.as_deref().and_then(parse_timestamp),
        file_created: created.as_deref().and_then(parse_timestamp),
        score: None,
    };
    (row.get("rowid"), result)
}

fn search_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query.split_whitespace().map(str::to_lowercase) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
