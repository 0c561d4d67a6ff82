//! File collector: one document per regular file under a folder

use super::traits::{CollectError, DocumentCollector, DocumentSink};
use crate::document::{Document, FormatHint};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use walkdir::WalkDir;

/// Registry name of the file collector
pub const FILE_COLLECTOR: &str = "FileCollector";

/// Walks a file or folder recursively in file-name order.
pub struct FileCollector {
    path: PathBuf,
}

impl FileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentCollector for FileCollector {
    fn name(&self) -> &str {
        FILE_COLLECTOR
    }

    async fn collect(&self, sink: &dyn DocumentSink) -> Result<(), CollectError> {
        if !self.path.exists() {
            return Err(CollectError::MissingSource(self.path.clone()));
        }

        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let blob = tokio::fs::read(path).await.map_err(|source| CollectError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), bytes = blob.len(), "Collected file");

            let document = Document::new(
                blob,
                FormatHint::from_path(path),
                FILE_COLLECTOR,
                path.display().to_string(),
            );
            sink.emit(document).await?;
        }

        Ok(())
    }
}
