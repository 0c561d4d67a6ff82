//! Collection: enumerate source documents and hand them to the pipeline
//!
//! A `DocumentCollector` finds documents and emits them into a
//! `DocumentSink`. The `CollectorRegistry` is the driver: it runs the
//! collectors, aborts on the first sink failure, and reports how
//! collection ended as a `CollectOutcome`.

mod driver;
mod file;
mod publish;
mod traits;

pub use driver::{CollectOutcome, CollectSummary, CollectorRegistry, DriverError};
pub use file::{FileCollector, FILE_COLLECTOR};
pub use publish::BusDocumentSink;
pub use traits::{CollectError, DocumentCollector, DocumentSink, SinkError};
