use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::store::{DocumentSource, RetrievalResult};
use crate::core::errors::EngineError;

/// Reads whole notes from the vault directory.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn read_documents(&self, paths: &[String]) -> Result<Vec<RetrievalResult>, EngineError> {
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let full_path = self.resolve(path);
            let content = match tokio::fs::read_to_string(&full_path).await {
                Ok(content) => content,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::warn!(path = %full_path.display(), "Selected note no longer exists");
                    continue;
                }
                Err(err) => return Err(EngineError::retrieval("read_document", err)),
            };
            let metadata = tokio::fs::metadata(&full_path).await.ok();

            documents.push(RetrievalResult {
                content,
                source_path: path.clone(),
                file_modified: metadata
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from),
                file_created: metadata
                    .as_ref()
                    .and_then(|m| m.created().ok())
                    .map(DateTime::<Utc>::from),
                score: None,
            });
        }
        Ok(documents)
    }
}
