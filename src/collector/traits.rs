//! Collector-side contracts: where documents come from and where they go

use crate::bus::BusError;
use crate::document::Document;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Why a document sink refused a document.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unable to publish document: {0}")]
    Publish(#[from] BusError),

    #[error("unable to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("collection aborted after an earlier emit failure: {0}")]
    Aborted(String),

    #[error("document rejected: {0}")]
    Rejected(String),
}

/// Errors a collector reports when enumeration ends early.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("source path does not exist: {0}")]
    MissingSource(PathBuf),

    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to walk source directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Accepts documents emitted by a collector.
///
/// `emit` is awaited once per document; a slow sink throttles enumeration.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn emit(&self, document: Document) -> Result<(), SinkError>;
}

/// Enumerates documents from some source.
///
/// Implementations call `sink.emit` for each document and must stop as
/// soon as an emit fails, propagating that error.
#[async_trait]
pub trait DocumentCollector: Send + Sync {
    /// Registry name, unique per registry
    fn name(&self) -> &str;

    async fn collect(&self, sink: &dyn DocumentSink) -> Result<(), CollectError>;
}
