//! Per-file analysis pipeline
//!
//! ```text
//! SyntaxTree ─► UnitBuilder ─► BatchPlanner ─► Dispatcher ─► Applier ─► GraphPort
//!                                                  ▲            │
//!                                                  └─ signals ◄─┤
//!                                                               └─► Aggregator
//! ```
//!
//! One [`Pipeline::run`] call analyzes one file. Instances share nothing
//! mutable, so several can run concurrently (see [`PipelineRunner`]).

mod aggregator;
mod applier;
pub mod config;
pub mod context;
mod dispatcher;
mod report;
mod runner;

pub use aggregator::{AggregationStats, Aggregator};
pub use applier::{Applier, ApplyStats, BatchOutcome};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use dispatcher::Dispatcher;
pub use report::{AggregationFailure, DegradedBatch, PipelineReport};
pub use runner::{FileOutcome, PipelineRunner};

use crate::batch::BatchPlanner;
use crate::error::PipelineError;
use crate::progress::ProgressEvent;
use crate::tree::{SourceText, SyntaxTree};
use crate::unit::UnitBuilder;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// One file to analyze
#[derive(Debug, Clone)]
pub struct PipelineInput {
    /// Identifies the file in graph records and progress events
    pub file: String,
    pub tree: SyntaxTree,
    pub source: SourceText,
}

impl PipelineInput {
    pub fn new(file: impl Into<String>, tree: SyntaxTree, source: SourceText) -> Self {
        Self {
            file: file.into(),
            tree,
            source,
        }
    }
}

pub struct Pipeline {
    context: PipelineContext,
}

impl Pipeline {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub async fn run(&self, input: PipelineInput) -> Result<PipelineReport, PipelineError> {
        let ctx = &self.context;
        let config = &ctx.config;
        let file = input.file;
        let started_at = Utc::now();
        let start = Instant::now();

        let graph = match UnitBuilder::new(ctx.token_counter.clone()).build(&input.tree, input.source)
        {
            Ok(graph) => Arc::new(graph),
            Err(err) => {
                let err = PipelineError::from(err);
                self.fail(&file, &err);
                return Err(err);
            }
        };
        let batches = BatchPlanner::new(config.token_limit).plan(graph.units());
        let batch_count = batches.len();

        info!(
            file = %file,
            units = graph.units().len(),
            batches = batch_count,
            aggregates = graph.aggregates().len(),
            token_limit = config.token_limit,
            "Planned analysis"
        );
        ctx.progress.on_progress(&ProgressEvent::RunStarted {
            file: file.clone(),
            units: graph.units().len(),
            batches: batch_count,
            at: Utc::now(),
        });

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let aggregator = Arc::new(Aggregator::new(
            file.clone(),
            graph.clone(),
            ctx.aggregation.clone(),
            ctx.graph.clone(),
            ctx.progress.clone(),
            config.aggregation_concurrency,
            config.analysis_timeout,
        ));
        let aggregation = tokio::spawn(aggregator.run(ready_rx));

        let applier = Arc::new(Applier::new(
            file.clone(),
            graph.clone(),
            batch_count,
            ctx.graph.clone(),
            ctx.progress.clone(),
            config.graph_retry_backoff,
            ready_tx,
        ));
        let dispatcher = Dispatcher::new(
            graph.clone(),
            ctx.analysis.clone(),
            config.concurrency,
            config.analysis_timeout,
        );

        let dispatched = dispatcher.run(batches, applier.clone()).await;
        applier.close().await;
        let aggregation = aggregation
            .await
            .map_err(|e| PipelineError::TaskFailed(e.to_string()));

        if let Err(err) = dispatched {
            self.fail(&file, &err);
            return Err(err);
        }
        let aggregation = match aggregation {
            Ok(stats) => stats,
            Err(err) => {
                self.fail(&file, &err);
                return Err(err);
            }
        };

        let applied = applier.stats().await;
        let report = PipelineReport {
            run_id: Uuid::new_v4(),
            file: file.clone(),
            units: graph.units().len(),
            analyzable_units: graph.analyzable_count(),
            batches: batch_count,
            applied_batches: applied.applied_batches,
            degraded: applied.degraded,
            aggregates: graph.aggregates().len(),
            finalized_aggregates: aggregation.finalized,
            aggregation_failures: aggregation.failures,
            started_at,
            duration: start.elapsed(),
        };

        ctx.progress.on_progress(&ProgressEvent::RunCompleted {
            file,
            applied_batches: report.applied_batches,
            degraded_batches: report.degraded.len(),
            duration: report.duration,
            at: Utc::now(),
        });
        Ok(report)
    }

    fn fail(&self, file: &str, err: &PipelineError) {
        error!(file = %file, error = %err, "Analysis run failed");
        self.context.progress.on_progress(&ProgressEvent::RunFailed {
            file: file.to_string(),
            error: err.to_string(),
            at: Utc::now(),
        });
    }
}
