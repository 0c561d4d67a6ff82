//! Pipeline orchestration: one collector pass feeding two bus-driven stages
//!
//! ```text
//! collectors ──emit──▶ DOCUMENT_INGESTION ──▶ processor
//!                                               │
//!          graph db ◀── assembler ◀── ingestor ◀┘ DOCUMENT_PROCESSED
//! ```

mod orchestrator;
mod report;

pub use orchestrator::{Pipeline, INGESTOR_CONSUMER, PROCESSOR_CONSUMER};
pub use report::{BlockedConsumer, PipelineReport, StageOutcome};

use crate::bus::BusError;
use crate::collector::DriverError;
use crate::config::ConfigError;
use crate::storage::StoreError;
use thiserror::Error;

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("unable to prepare graph database: {0}")]
    Database(#[from] StoreError),

    /// A collected document could not be published.
    #[error("collection aborted: {0}")]
    Intake(#[from] DriverError),

    /// A stage loop ended on its own error.
    #[error("{stage} ended with error: {reason}")]
    Stage { stage: &'static str, reason: String },
}

impl PipelineError {
    /// Whether the process should exit non-zero.
    ///
    /// Setup failures and lost intake documents are fatal; a stage loop
    /// ending on error is only logged.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Stage { .. })
    }
}
