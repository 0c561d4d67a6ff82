//! Collector driver: runs registered collectors and classifies how they end

use super::traits::{CollectError, DocumentCollector, DocumentSink, SinkError};
use crate::document::Document;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, instrument};

/// How a collection run ended, when it was not aborted.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    /// Every collector finished enumeration without error
    Graceful,
    /// At least one collector stopped on its own error
    Failed(String),
}

impl CollectOutcome {
    /// Classify a collector's terminal result, logging it.
    pub fn from_result(collector: &str, result: Result<(), CollectError>) -> Self {
        match result {
            Ok(()) => {
                info!(collector = %collector, "collector ended gracefully");
                Self::Graceful
            }
            Err(e) => {
                error!(collector = %collector, error = %e, "collector ended with error");
                Self::Failed(format!("{}: {}", collector, e))
            }
        }
    }

    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Graceful)
    }

    fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Graceful, o) | (o, Self::Graceful) => o,
            (Self::Failed(a), Self::Failed(b)) => Self::Failed(format!("{}; {}", a, b)),
        }
    }
}

/// Summary of a collection run
#[derive(Debug, Clone, PartialEq)]
pub struct CollectSummary {
    /// Documents the sink accepted
    pub emitted: usize,
    pub outcome: CollectOutcome,
}

/// Fatal collection conditions
#[derive(Debug, Error)]
pub enum DriverError {
    /// The sink refused a document; it is lost unless collection stops here.
    #[error("collector {collector} could not emit {document}: {error}")]
    EmitFailed {
        collector: String,
        document: String,
        #[source]
        error: SinkError,
    },

    #[error("collector {0} is already registered")]
    AlreadyRegistered(String),
}

/// Wraps the real sink, records the first failure and refuses everything
/// after it so enumeration cannot continue past a lost document.
struct GuardedSink<'a> {
    inner: &'a dyn DocumentSink,
    offered: AtomicUsize,
    accepted: AtomicUsize,
    failure: Mutex<Option<(String, SinkError)>>,
}

impl<'a> GuardedSink<'a> {
    fn new(inner: &'a dyn DocumentSink) -> Self {
        Self {
            inner,
            offered: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    fn take_failure(&self) -> Option<(String, SinkError)> {
        self.failure.lock().unwrap().take()
    }
}

#[async_trait]
impl DocumentSink for GuardedSink<'_> {
    async fn emit(&self, document: Document) -> Result<(), SinkError> {
        let aborted = self
            .failure
            .lock()
            .unwrap()
            .as_ref()
            .map(|(source, _)| source.clone());
        if let Some(source) = aborted {
            return Err(SinkError::Aborted(source));
        }
        self.offered.fetch_add(1, Ordering::SeqCst);
        let source = document.source().to_string();
        match self.inner.emit(document).await {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                let reason = format!("{}: {}", source, e);
                *self.failure.lock().unwrap() = Some((source, e));
                Err(SinkError::Aborted(reason))
            }
        }
    }
}

/// Ordered set of collectors run by one collection pass
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn DocumentCollector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector. Names must be unique.
    pub fn register(&mut self, collector: Arc<dyn DocumentCollector>) -> Result<(), DriverError> {
        if self.collectors.iter().any(|c| c.name() == collector.name()) {
            return Err(DriverError::AlreadyRegistered(collector.name().to_string()));
        }
        self.collectors.push(collector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run every collector in registration order, emitting into `sink`.
    ///
    /// A sink failure aborts the whole run with [`DriverError::EmitFailed`].
    /// A collector's own error only marks the outcome as failed.
    #[instrument(skip(self, sink), fields(collectors = self.collectors.len()))]
    pub async fn collect(&self, sink: &dyn DocumentSink) -> Result<CollectSummary, DriverError> {
        let mut emitted = 0;
        let mut outcome = CollectOutcome::Graceful;

        for collector in &self.collectors {
            let guard = GuardedSink::new(sink);
            let result = collector.collect(&guard).await;
            emitted += guard.accepted.load(Ordering::SeqCst);

            if let Some((document, error)) = guard.take_failure() {
                error!(
                    collector = %collector.name(),
                    document = %document,
                    offered = guard.offered.load(Ordering::SeqCst),
                    error = %error,
                    "collector ended with error"
                );
                return Err(DriverError::EmitFailed {
                    collector: collector.name().to_string(),
                    document,
                    error,
                });
            }

            outcome = outcome.combine(CollectOutcome::from_result(collector.name(), result));
        }

        Ok(CollectSummary { emitted, outcome })
    }
}
