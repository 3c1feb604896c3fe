//! Error taxonomy of the analysis pipeline
//!
//! | Error                  | Scope       | Effect                                   |
//! |------------------------|-------------|------------------------------------------|
//! | [`CollectionError`]    | input tree  | fatal, the pipeline never starts         |
//! | [`AnalysisCallError`]  | one batch   | batch is degraded, run continues         |
//! | [`GraphApplyError`]    | one commit  | retried once, then fatal for the run     |
//! | [`AggregationError`]   | aggregate   | logged, aggregate has no holistic summary|

use crate::batch::BatchId;
use crate::llm::BackendError;
use crate::unit::AggregateKey;
use thiserror::Error;

/// The input tree cannot be flattened into units
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("Syntax tree is empty")]
    EmptyTree,

    #[error("Root index {root} is out of bounds for a tree of {len} nodes")]
    RootOutOfBounds { root: usize, len: usize },

    #[error("Node {index} ({kind}) has no line range")]
    MissingRange { index: usize, kind: String },

    #[error("Node {index} ({kind}) has an invalid line range {start}~{end}; lines are 1-based")]
    InvalidRange {
        index: usize,
        kind: String,
        start: u32,
        end: u32,
    },

    #[error("Node {parent} references missing child {child}")]
    DanglingChild { parent: usize, child: usize },

    #[error("Node {index} is reachable more than once (cyclic or shared children)")]
    Cycle { index: usize },
}

/// An external analysis call failed for one batch
#[derive(Debug, Clone, Error)]
pub enum AnalysisCallError {
    #[error("Analysis backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Analysis timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Invalid analysis response: {message}")]
    InvalidResponse { message: String },

    #[error("Analysis failed: {0}")]
    Other(String),
}

/// A mutation set could not be written to the graph store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphApplyError {
    #[error("Graph store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Graph write rejected: {message}")]
    Rejected { message: String },
}

/// Holistic summarization of an aggregate failed
#[derive(Debug, Clone, Error)]
pub enum AggregationError {
    #[error("Aggregation backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Aggregation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Invalid aggregation response: {message}")]
    InvalidResponse { message: String },

    #[error("Failed to store holistic summary: {0}")]
    Graph(#[from] GraphApplyError),

    #[error("Aggregate {0} does not exist")]
    UnknownAggregate(AggregateKey),

    #[error("Aggregate {0} still has units waiting to be applied")]
    NotReady(AggregateKey),

    #[error("Aggregate {0} was triggered for finalization more than once")]
    AlreadyFinalized(AggregateKey),
}

/// Failures that stop a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to collect units: {0}")]
    Collection(#[from] CollectionError),

    #[error("Failed to apply batch {batch_id} after retry: {source}")]
    GraphApply {
        batch_id: BatchId,
        #[source]
        source: GraphApplyError,
    },

    #[error("Batch {0} is outside the planned range or was submitted twice")]
    UnexpectedBatch(BatchId),

    #[error("Run aborted after an earlier apply failure")]
    Aborted,

    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    /// Returns a user-facing message with troubleshooting hints
    pub fn help_message(&self) -> String {
        match self {
            PipelineError::Collection(e) => format!(
                "Error: The syntax tree could not be processed\n\n\
                Help: The parser output is malformed. Check that:\n\
                - every node has startLine and endLine\n\
                - child indices point at existing nodes\n\
                - no node appears under two parents\n\n\
                Details: {}",
                e
            ),
            PipelineError::GraphApply { batch_id, source } => format!(
                "Error: Graph store write failed for batch {}\n\n\
                Help: Batches 1..{} were applied; nothing after was attempted.\n\
                Re-running the file is safe because graph writes are upserts.\n\n\
                Details: {}",
                batch_id,
                batch_id.0.saturating_sub(1),
                source
            ),
            other => format!("Error: {}", other),
        }
    }
}
