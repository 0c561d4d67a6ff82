//! Durable publish/subscribe bus between pipeline stages
//!
//! Stages never talk to each other directly: the collector publishes raw
//! documents, the processor republishes document trees, and the ingestor
//! consumes those. The `MessageBus` trait is the seam; `SqliteBus` is the
//! durable implementation.

mod sqlite;
mod traits;

pub use tokio_util::sync::CancellationToken;
pub use sqlite::SqliteBus;
pub use traits::{topic, BusError, BusResult, Delivery, MessageBus, Subscription};
