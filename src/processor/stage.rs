//! Processor stage loop and its outbound sink

use super::builder::TreeBuilder;
use super::ProcessError;
use crate::bus::{topic, MessageBus, Subscription};
use crate::document::{Document, DocumentTree};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Where built document trees go.
#[async_trait]
pub trait TreeSink: Send + Sync {
    async fn forward(&self, tree: DocumentTree) -> Result<(), ProcessError>;
}

/// Publishes serialized trees on [`topic::DOCUMENT_PROCESSED`].
pub struct BusTreeSink {
    bus: Arc<dyn MessageBus>,
}

impl BusTreeSink {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl TreeSink for BusTreeSink {
    async fn forward(&self, tree: DocumentTree) -> Result<(), ProcessError> {
        let payload = tree.to_payload().map_err(ProcessError::Encode)?;
        self.bus.publish(topic::DOCUMENT_PROCESSED, &payload).await?;
        Ok(())
    }
}

/// Turns raw documents off the bus into trees and forwards them.
///
/// Holds no state between documents. The first failure ends the loop;
/// the failing delivery stays unacknowledged.
pub struct ProcessorStage {
    builder: Arc<dyn TreeBuilder>,
    sink: Arc<dyn TreeSink>,
}

impl ProcessorStage {
    pub fn new(builder: Arc<dyn TreeBuilder>, sink: Arc<dyn TreeSink>) -> Self {
        Self { builder, sink }
    }

    /// Consume `subscription` until it ends. Returns the number of
    /// documents handled.
    #[instrument(name = "processor", skip_all)]
    pub async fn run(&self, mut subscription: Box<dyn Subscription>) -> Result<usize, ProcessError> {
        let mut handled = 0;

        while let Some(delivery) = subscription.next().await {
            let delivery = delivery?;
            let document = Document::from_payload(&delivery.payload).map_err(ProcessError::Decode)?;
            let tree = self.builder.build_tree(&document)?;
            debug!(
                source = %document.source(),
                documents = tree.len(),
                seq = delivery.sequence,
                "Built document tree"
            );
            self.sink.forward(tree).await?;
            subscription.ack(&delivery).await?;
            handled += 1;
        }

        info!(handled = handled, "Processor loop finished");
        Ok(handled)
    }
}
