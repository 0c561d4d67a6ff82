//! What a pipeline run produced

use super::PipelineError;
use crate::collector::CollectOutcome;
use std::fmt::Display;
use tokio::task::JoinError;
use tracing::{error, info};
use uuid::Uuid;

/// How a stage loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Input exhausted; `handled` messages were acknowledged
    Completed { handled: usize },
    /// The loop stopped on an error (or the task panicked)
    Failed(String),
}

impl StageOutcome {
    /// Classify a joined stage task, logging failures.
    pub(crate) fn from_join<E: Display>(
        stage: &'static str,
        joined: Result<Result<usize, E>, JoinError>,
    ) -> Self {
        match joined {
            Ok(Ok(handled)) => {
                info!(stage = stage, handled = handled, "{} ended gracefully", stage);
                Self::Completed { handled }
            }
            Ok(Err(e)) => {
                error!(stage = stage, error = %e, "{} ended with error", stage);
                Self::Failed(e.to_string())
            }
            Err(e) => {
                error!(stage = stage, error = %e, "{} task did not complete", stage);
                Self::Failed(e.to_string())
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Messages handled, zero for a failed stage
    pub fn handled(&self) -> usize {
        match self {
            Self::Completed { handled } => *handled,
            Self::Failed(_) => 0,
        }
    }
}

/// A failed stage whose oldest unacknowledged message was already on the
/// bus when the run started.
///
/// The message is redelivered first on every run, so the stage fails on it
/// again before it reaches anything new. Resetting the stream
/// (`--recreate-stream`) discards it.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedConsumer {
    pub stage: &'static str,
    pub topic: String,
    pub consumer: String,
    /// Sequence of the message the consumer is stuck on
    pub sequence: i64,
}

/// Summary returned by [`Pipeline::run`](super::Pipeline::run)
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub collection: CollectOutcome,
    /// Documents published on the raw topic
    pub documents_published: usize,
    pub processor: StageOutcome,
    pub ingestor: StageOutcome,
    /// Failed stages stuck on a message from an earlier run
    pub blocked: Vec<BlockedConsumer>,
}

impl PipelineReport {
    /// True when collection was graceful and both stages completed.
    pub fn is_clean(&self) -> bool {
        self.collection.is_graceful() && self.processor.is_completed() && self.ingestor.is_completed()
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }

    /// Non-fatal errors for every failed stage.
    pub fn stage_failures(&self) -> impl Iterator<Item = PipelineError> + '_ {
        [("processor", &self.processor), ("ingestor", &self.ingestor)]
            .into_iter()
            .filter_map(|(stage, outcome)| match outcome {
                StageOutcome::Failed(reason) => Some(PipelineError::Stage {
                    stage,
                    reason: reason.clone(),
                }),
                StageOutcome::Completed { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_join() {
        let ok: Result<Result<usize, String>, JoinError> = Ok(Ok(3));
        assert_eq!(
            StageOutcome::from_join("processor", ok),
            StageOutcome::Completed { handled: 3 }
        );

        let failed: Result<Result<usize, String>, JoinError> = Ok(Err("bad json".to_string()));
        let outcome = StageOutcome::from_join("ingestor", failed);
        assert_eq!(outcome, StageOutcome::Failed("bad json".to_string()));
        assert_eq!(outcome.handled(), 0);
    }

    #[test]
    fn failures_are_reported_per_stage() {
        let report = PipelineReport {
            run_id: Uuid::new_v4(),
            collection: CollectOutcome::Graceful,
            documents_published: 2,
            processor: StageOutcome::Completed { handled: 2 },
            ingestor: StageOutcome::Failed("database down".to_string()),
            blocked: Vec::new(),
        };

        assert!(!report.is_clean());
        assert!(!report.is_blocked());
        let failures: Vec<_> = report.stage_failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].is_fatal());
        assert_eq!(failures[0].to_string(), "ingestor ended with error: database down");
    }
}
