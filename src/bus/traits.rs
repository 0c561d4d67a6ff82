//! Message bus trait definitions

use tokio_util::sync::CancellationToken;
use async_trait::async_trait;
use thiserror::Error;

/// Stable topic names
pub mod topic {
    /// Raw documents published by the collector
    pub const DOCUMENT_INGESTION: &str = "DOCUMENT_INGESTION";
    /// Serialized document trees published by the processor
    pub const DOCUMENT_PROCESSED: &str = "DOCUMENT_PROCESSED";
}

/// Errors that can occur on the bus
#[derive(Debug, Error)]
pub enum BusError {
    #[error("unable to connect to bus at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus is closed")]
    Closed,
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// One message handed to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Position of the message in the stream, monotonic per bus
    pub sequence: i64,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A long-lived, lazily consumed sequence of deliveries on one topic.
///
/// Delivery is at-least-once: a message counts as consumed only after
/// [`ack`](Subscription::ack). Unacknowledged messages are redelivered to
/// the next subscription under the same consumer name.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `None` once the subscription's token is cancelled and no
    /// queued message remains, or when the bus is closed.
    async fn next(&mut self) -> Option<BusResult<Delivery>>;

    /// Mark `delivery` (and everything before it) as consumed.
    async fn ack(&mut self, delivery: &Delivery) -> BusResult<()>;
}

/// Durable publish/subscribe bus between pipeline stages.
///
/// Implementations must be thread-safe; one bus is shared by every stage.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Ensure the durable stream infrastructure exists.
    async fn initialize(&self) -> BusResult<()>;

    /// Drop every queued message and consumer position.
    ///
    /// Destructive. Meant for test and development runs only.
    async fn recreate(&self) -> BusResult<()>;

    /// Enqueue `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()>;

    /// Start consuming `topic` as the durable consumer `consumer`.
    async fn subscribe(
        &self,
        topic: &str,
        consumer: &str,
        cancel: CancellationToken,
    ) -> BusResult<Box<dyn Subscription>>;

    /// Highest sequence published on `topic` so far (0 if none).
    async fn high_water_mark(&self, topic: &str) -> BusResult<i64>;

    /// Sequence of the oldest message on `topic` that `consumer` has not
    /// acknowledged, if any.
    async fn next_pending(&self, topic: &str, consumer: &str) -> BusResult<Option<i64>>;

    /// Release the underlying connection and wake every subscriber.
    async fn close(&self);
}
