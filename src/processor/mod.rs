//! Document processing: raw documents in, document trees out

mod builder;
mod stage;

pub use builder::{BundleTreeBuilder, TreeBuilder, BUNDLE_KEY};
pub use stage::{BusTreeSink, ProcessorStage, TreeSink};

use crate::bus::BusError;
use thiserror::Error;

/// Errors that end the processor loop
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("unable to decode document payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("document {document} is not valid json: {error}")]
    MalformedJson {
        document: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("failed marshal of document: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}
