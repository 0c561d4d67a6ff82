//! Publisher: the document sink that writes onto the raw-document topic

use super::traits::{DocumentSink, SinkError};
use crate::bus::{topic, MessageBus};
use crate::document::Document;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Publishes every emitted document on [`topic::DOCUMENT_INGESTION`].
///
/// `emit` returns only once the bus accepted the payload, so bus
/// backpressure throttles the collector directly.
pub struct BusDocumentSink {
    bus: Arc<dyn MessageBus>,
}

impl BusDocumentSink {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl DocumentSink for BusDocumentSink {
    async fn emit(&self, document: Document) -> Result<(), SinkError> {
        let payload = document.to_payload()?;
        self.bus
            .publish(topic::DOCUMENT_INGESTION, &payload)
            .await?;
        debug!(source = %document.source(), "Published document");
        Ok(())
    }
}
