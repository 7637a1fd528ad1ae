//! Turns a query plus filter settings into grounding documents.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::{DateFilter, DocumentSource, RetrievalResult, SearchIndex, SearchMode};
use crate::core::errors::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalFilters {
    /// Explicit selection; when non-empty, search is skipped.
    pub files: Vec<String>,
    /// Result cap. Zero disables retrieval.
    pub limit: usize,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
    pub search_mode: SearchMode,
    /// Replace each hit with its whole source note.
    pub pass_full_note: bool,
}

impl RetrievalFilters {
    pub fn date_filter(&self) -> Option<DateFilter> {
        DateFilter::new(self.min_date, self.max_date)
    }
}

#[derive(Clone)]
pub struct RetrievalResolver {
    index: Option<Arc<dyn SearchIndex>>,
    documents: Arc<dyn DocumentSource>,
}

impl RetrievalResolver {
    pub fn new(index: Option<Arc<dyn SearchIndex>>, documents: Arc<dyn DocumentSource>) -> Self {
        Self { index, documents }
    }

    /// An empty result is a valid outcome; unreachable storage is an error.
    pub async fn resolve(
        &self,
        query: &str,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievalResult>, EngineError> {
        if !filters.files.is_empty() {
            return self
                .documents
                .read_documents(&filters.files)
                .await
                .map_err(|e| as_retrieval("read_files", e));
        }

        if filters.limit == 0 {
            return Ok(Vec::new());
        }

        let index = self.index.as_ref().ok_or_else(|| {
            EngineError::retrieval("search", "no vector table is configured for this vault")
        })?;
        let date_filter = filters.date_filter();
        let hits = index
            .search(query, filters.limit, date_filter.as_ref(), filters.search_mode)
            .await
            .map_err(|e| as_retrieval("search", e))?;

        tracing::debug!(
            hits = hits.len(),
            mode = ?filters.search_mode,
            "Retrieved context"
        );

        if !filters.pass_full_note {
            return Ok(hits);
        }

        let mut seen = HashSet::new();
        let paths: Vec<String> = hits
            .into_iter()
            .map(|hit| hit.source_path)
            .filter(|path| seen.insert(path.clone()))
            .collect();
        self.documents
            .read_documents(&paths)
            .await
            .map_err(|e| as_retrieval("expand_notes", e))
    }
}

/// Concatenate result contents, separated by a blank line, in order.
pub fn format_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn as_retrieval(operation: &'static str, err: EngineError) -> EngineError {
    match err {
        err @ EngineError::Retrieval { .. } => err,
        other => EngineError::retrieval(operation, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingIndex {
        hits: Vec<RetrievalResult>,
        calls: Mutex<Vec<(String, usize, Option<DateFilter>, SearchMode)>>,
        fail: bool,
    }

    #[async_trait]
    impl SearchIndex for RecordingIndex {
        async fn search(
            &self,
            query: &str,
            limit: usize,
            filter: Option<&DateFilter>,
            mode: SearchMode,
        ) -> Result<Vec<RetrievalResult>, EngineError> {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), limit, filter.cloned(), mode));
            if self.fail {
                return Err(EngineError::storage("search", "t", "database is locked"));
            }
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    struct StaticDocuments;

    #[async_trait]
    impl DocumentSource for StaticDocuments {
        async fn read_documents(
            &self,
            paths: &[String],
        ) -> Result<Vec<RetrievalResult>, EngineError> {
            Ok(paths
                .iter()
                .map(|p| result(p, &format!("full text of {}", p)))
                .collect())
        }
    }

    fn result(path: &str, content: &str) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            source_path: path.to_string(),
            file_modified: None,
            file_created: None,
            score: None,
        }
    }

    fn resolver(index: Arc<RecordingIndex>) -> RetrievalResolver {
        RetrievalResolver::new(Some(index as Arc<dyn SearchIndex>), Arc::new(StaticDocuments))
    }

    #[tokio::test]
    async fn explicit_files_bypass_search() {
        let index = Arc::new(RecordingIndex::default());
        let filters = RetrievalFilters {
            files: vec!["a.md".into(), "b.md".into()],
            limit: 5,
            ..Default::default()
        };
        let results = resolver(index.clone()).resolve("q", &filters).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "full text of a.md");
        assert!(index.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_limit_disables_retrieval() {
        let index = Arc::new(RecordingIndex::default());
        let results = resolver(index.clone())
            .resolve("q", &RetrievalFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(index.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_receives_cap_mode_and_date_bounds() {
        let index = Arc::new(RecordingIndex {
            hits: vec![result("a.md", "one"), result("b.md", "two")],
            ..Default::default()
        });
        let min = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let filters = RetrievalFilters {
            limit: 3,
            min_date: Some(min),
            search_mode: SearchMode::Hybrid,
            ..Default::default()
        };
        let results = resolver(index.clone()).resolve("thing", &filters).await.unwrap();
        assert_eq!(results.len(), 2);

        let calls = index.calls.lock().unwrap();
        let (query, limit, filter, mode) = &calls[0];
        assert_eq!(query, "thing");
        assert_eq!(*limit, 3);
        assert_eq!(filter.as_ref().unwrap().min, Some(min));
        assert_eq!(filter.as_ref().unwrap().max, None);
        assert_eq!(*mode, SearchMode::Hybrid);
    }

    #[tokio::test]
    async fn full_note_expansion_dedups_in_first_occurrence_order() {
        let index = Arc::new(RecordingIndex {
            hits: vec![
                result("b.md", "b1"),
                result("a.md", "a1"),
                result("b.md", "b2"),
            ],
            ..Default::default()
        });
        let filters = RetrievalFilters {
            limit: 10,
            pass_full_note: true,
            ..Default::default()
        };
        let results = resolver(index).resolve("q", &filters).await.unwrap();
        let paths: Vec<&str> = results.iter().map(|r| r.source_path.as_str()).collect();
        assert_eq!(paths, vec!["b.md", "a.md"]);
        assert_eq!(results[0].content, "full text of b.md");
    }

    #[tokio::test]
    async fn storage_failure_is_a_retrieval_error() {
        let index = Arc::new(RecordingIndex {
            fail: true,
            ..Default::default()
        });
        let filters = RetrievalFilters {
            limit: 3,
            ..Default::default()
        };
        let err = resolver(index).resolve("q", &filters).await.unwrap_err();
        assert!(matches!(err, EngineError::Retrieval { operation: "search", .. }));
    }

    #[tokio::test]
    async fn missing_index_is_a_retrieval_error() {
        let resolver = RetrievalResolver::new(None, Arc::new(StaticDocuments));
        let filters = RetrievalFilters {
            limit: 3,
            ..Default::default()
        };
        assert!(resolver.resolve("q", &filters).await.is_err());
    }

    #[test]
    fn context_is_joined_with_blank_lines() {
        let joined = format_context(&[result("a", "one"), result("b", "two")]);
        assert_eq!(joined, "one\n\ntwo");
    }
}
