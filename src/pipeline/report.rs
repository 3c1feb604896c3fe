use crate::batch::BatchId;
use crate::unit::{AggregateKey, UnitId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// A batch whose analysis failed; its units were applied with empty summaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedBatch {
    pub batch_id: BatchId,
    pub units: Vec<UnitId>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationFailure {
    pub key: AggregateKey,
    pub name: String,
    pub error: String,
}

/// Outcome of one file's run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub file: String,
    pub units: usize,
    pub analyzable_units: usize,
    pub batches: usize,
    pub applied_batches: usize,
    pub degraded: Vec<DegradedBatch>,
    pub aggregates: usize,
    pub finalized_aggregates: usize,
    pub aggregation_failures: Vec<AggregationFailure>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl PipelineReport {
    /// No degraded batch and no failed aggregation
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty() && self.aggregation_failures.is_empty()
    }

    pub fn analysis_errors(&self) -> usize {
        self.degraded.len()
    }
}
