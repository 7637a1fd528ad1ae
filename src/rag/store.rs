//! Shared retrieval types and the traits the resolver depends on.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::EngineError;

/// Timestamp layout used in table rows and date predicates.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One grounding unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub source_path: String,
    #[serde(default)]
    pub file_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_created: Option<DateTime<Utc>>,
    /// Relevance score; higher is better. Absent for explicit file selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Vector,
    Text,
    Hybrid,
}

/// Bounds on file modification time. Both ends are exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateFilter {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

impl DateFilter {
    pub fn new(min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> Option<Self> {
        if min.is_none() && max.is_none() {
            return None;
        }
        Some(Self { min, max })
    }

    /// SQL predicate over the `filemodified` column plus its bind values.
    pub fn to_sql(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        if let Some(min) = &self.min {
            clauses.push("filemodified > ?");
            binds.push(format_timestamp(min));
        }
        if let Some(max) = &self.max {
            clauses.push("filemodified < ?");
            binds.push(format_timestamp(max));
        }
        (clauses.join(" AND "), binds)
    }
}

/// A row written into a vector table by the ingestion side.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub notepath: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub subnoteindex: i64,
    pub timeadded: DateTime<Utc>,
    pub filemodified: Option<DateTime<Utc>>,
    pub filecreated: Option<DateTime<Utc>>,
}

impl VectorEntry {
    pub fn new(notepath: impl Into<String>, content: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            notepath: notepath.into(),
            vector,
            content: content.into(),
            subnoteindex: 0,
            timeadded: Utc::now(),
            filemodified: None,
            filecreated: None,
        }
    }
}

/// A named text-to-vector function with a fixed output width.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// Stable identifier; part of the table name.
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&DateFilter>,
        mode: SearchMode,
    ) -> Result<Vec<RetrievalResult>, EngineError>;
}

/// Full-document access to the corpus.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn read_documents(&self, paths: &[String]) -> Result<Vec<RetrievalResult>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_filter_renders_strict_bounds() {
        let min = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let max = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let filter = DateFilter::new(Some(min), Some(max)).unwrap();
        let (sql, binds) = filter.to_sql();
        assert_eq!(sql, "filemodified > ? AND filemodified < ?");
        assert_eq!(binds, vec!["2024-01-02 03:04:05", "2024-06-01 00:00:00"]);

        let (sql, binds) = DateFilter::new(None, Some(max)).unwrap().to_sql();
        assert_eq!(sql, "filemodified < ?");
        assert_eq!(binds.len(), 1);

        assert!(DateFilter::new(None, None).is_none());
    }

    #[test]
    fn timestamps_round_trip_at_second_precision() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
