//! Ingestion: processed documents in, graph fragments delivered to storage

mod parser;

pub use parser::{ArtifactParser, DocumentParser, ParseError};

use crate::storage::StoreError;
use crate::bus::{BusError, Subscription};
use crate::document::DocumentTree;
use crate::graph::Graph;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors that end the ingestor loop
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unable to decode document tree: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unable to store graph: {0}")]
    Store(#[from] StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// Receives the graph fragments parsed from one processed document.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn store(&self, fragments: Vec<Graph>) -> Result<(), StoreError>;
}

/// Batching for the ingestor loop.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Most processed documents whose fragments go into one `store` call.
    pub batch_size: usize,
    /// How long to wait for another document before storing a partial batch.
    pub flush_interval: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            flush_interval: Duration::from_millis(250),
        }
    }
}

/// Parses processed documents off the bus and delivers their fragments.
///
/// The first failure ends the loop; deliveries of the failing batch stay
/// unacknowledged.
pub struct IngestorStage {
    parser: Arc<dyn DocumentParser>,
    sink: Arc<dyn GraphSink>,
    config: IngestorConfig,
}

impl IngestorStage {
    pub fn new(parser: Arc<dyn DocumentParser>, sink: Arc<dyn GraphSink>) -> Self {
        Self::with_config(parser, sink, IngestorConfig::default())
    }

    pub fn with_config(
        parser: Arc<dyn DocumentParser>,
        sink: Arc<dyn GraphSink>,
        config: IngestorConfig,
    ) -> Self {
        Self {
            parser,
            sink,
            config,
        }
    }

    /// Consume `subscription` until it ends. Returns the number of
    /// processed documents handled.
    #[instrument(name = "ingestor", skip_all, fields(batch_size = self.config.batch_size))]
    pub async fn run(&self, mut subscription: Box<dyn Subscription>) -> Result<usize, IngestError> {
        let mut handled = 0;

        while let Some(first) = subscription.next().await {
            let mut batch = vec![first?];
            while batch.len() < self.config.batch_size.max(1) {
                match tokio::time::timeout(self.config.flush_interval, subscription.next()).await {
                    Ok(Some(delivery)) => batch.push(delivery?),
                    Ok(None) | Err(_) => break,
                }
            }

            let mut fragments = Vec::new();
            for delivery in &batch {
                let tree = DocumentTree::from_payload(&delivery.payload).map_err(IngestError::Decode)?;
                let parsed = self.parser.parse(&tree)?;
                debug!(
                    source = %tree.document.source(),
                    fragments = parsed.len(),
                    seq = delivery.sequence,
                    "Parsed document tree"
                );
                fragments.extend(parsed);
            }

            self.sink.store(fragments).await?;
            if let Some(last) = batch.last() {
                subscription.ack(last).await?;
            }
            handled += batch.len();
        }

        info!(handled = handled, "Ingestor loop finished");
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{topic, CancellationToken, MessageBus, SqliteBus};
    use crate::document::{Document, FormatHint};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGraphSink {
        batches: Mutex<Vec<Vec<Graph>>>,
        fail: bool,
    }

    #[async_trait]
    impl GraphSink for RecordingGraphSink {
        async fn store(&self, fragments: Vec<Graph>) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Rejected("database down".to_string()));
            }
            self.batches.lock().unwrap().push(fragments);
            Ok(())
        }
    }

    fn vuln(id: &str) -> Vec<u8> {
        let doc = Document::new(
            format!(r#"{{"id":"{}","affected":[]}}"#, id).into_bytes(),
            FormatHint::Json,
            "file",
            format!("{}.json", id),
        );
        DocumentTree::leaf(doc).to_payload().unwrap()
    }

    async fn processed_bus(payloads: &[Vec<u8>]) -> (SqliteBus, Box<dyn Subscription>) {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.initialize().await.unwrap();
        for payload in payloads {
            bus.publish(topic::DOCUMENT_PROCESSED, payload).await.unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sub = bus
            .subscribe(topic::DOCUMENT_PROCESSED, "ingestor", cancel)
            .await
            .unwrap();
        (bus, sub)
    }

    #[tokio::test]
    async fn delivers_fragments_per_document() {
        let (_bus, sub) = processed_bus(&[vuln("GHSA-1"), vuln("GHSA-2")]).await;
        let sink = Arc::new(RecordingGraphSink::default());
        let stage = IngestorStage::new(Arc::new(ArtifactParser::new()), sink.clone());

        assert_eq!(stage.run(sub).await.unwrap(), 2);
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].nodes[0].attribute_str("id"), Some("GHSA-2"));
    }

    #[tokio::test]
    async fn parse_error_ends_the_loop() {
        let bad = DocumentTree::leaf(Document::new(
            b"{\"what\":1}".to_vec(),
            FormatHint::Json,
            "file",
            "what.json",
        ))
        .to_payload()
        .unwrap();
        let (bus, sub) = processed_bus(&[bad, vuln("GHSA-1")]).await;
        let sink = Arc::new(RecordingGraphSink::default());
        let stage = IngestorStage::new(Arc::new(ArtifactParser::new()), sink.clone());

        let err = stage.run(sub).await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(ParseError::Unrecognized(_))));
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(bus.acked_position(topic::DOCUMENT_PROCESSED, "ingestor").unwrap(), 0);
    }

    #[tokio::test]
    async fn store_error_ends_the_loop() {
        let (_bus, sub) = processed_bus(&[vuln("GHSA-1")]).await;
        let sink = Arc::new(RecordingGraphSink {
            fail: true,
            ..Default::default()
        });
        let stage = IngestorStage::new(Arc::new(ArtifactParser::new()), sink);

        assert!(matches!(stage.run(sub).await.unwrap_err(), IngestError::Store(_)));
    }

    #[tokio::test]
    async fn batches_ready_documents_into_one_store_call() {
        let (bus, sub) = processed_bus(&[vuln("GHSA-1"), vuln("GHSA-2"), vuln("GHSA-3")]).await;
        let sink = Arc::new(RecordingGraphSink::default());
        let stage = IngestorStage::with_config(
            Arc::new(ArtifactParser::new()),
            sink.clone(),
            IngestorConfig {
                batch_size: 2,
                flush_interval: Duration::from_millis(200),
            },
        );

        assert_eq!(stage.run(sub).await.unwrap(), 3);
        let batches = sink.batches.lock().unwrap();
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert!(bus.acked_position(topic::DOCUMENT_PROCESSED, "ingestor").unwrap() > 0);
    }
}
