//! Bounded-concurrency dispatch of batches to the analysis port
//!
//! Every batch runs as its own task. A task first waits for the completion
//! signals of the children of its has-children units, then takes an
//! analysis slot. Waiting happens outside the slot so blocked parents never
//! starve ready leaves.

use super::applier::{Applier, BatchOutcome};
use crate::batch::Batch;
use crate::error::{AnalysisCallError, PipelineError};
use crate::ports::{AnalysisPort, BatchPayload};
use crate::unit::{wait_all, Unit, UnitGraph};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct Dispatcher {
    graph: Arc<UnitGraph>,
    port: Arc<dyn AnalysisPort>,
    slots: Arc<Semaphore>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        graph: Arc<UnitGraph>,
        port: Arc<dyn AnalysisPort>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            graph,
            port,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Runs every batch to commit. On the first fatal error all outstanding
    /// batch tasks are aborted.
    pub async fn run(&self, batches: Vec<Batch>, applier: Arc<Applier>) -> Result<(), PipelineError> {
        let mut tasks = JoinSet::new();
        for batch in batches {
            let graph = self.graph.clone();
            let port = self.port.clone();
            let slots = self.slots.clone();
            let applier = applier.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = analyze(&graph, port.as_ref(), &slots, timeout, &batch).await?;
                applier.submit(batch, outcome).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| PipelineError::TaskFailed(e.to_string()))
                .and_then(|submitted| submitted);
            if let Err(err) = result {
                tasks.shutdown().await;
                // A task that lost the race to the failing commit only saw `Aborted`
                return Err(match err {
                    PipelineError::Aborted => applier.fatal_error().await.unwrap_or(err),
                    other => other,
                });
            }
        }
        Ok(())
    }
}

async fn analyze(
    graph: &UnitGraph,
    port: &dyn AnalysisPort,
    slots: &Semaphore,
    timeout: Duration,
    batch: &Batch,
) -> Result<BatchOutcome, PipelineError> {
    let dependencies = batch.dependencies(graph);
    if !dependencies.is_empty() {
        debug!(batch_id = %batch.id, waiting_on = dependencies.len(), "Waiting for children");
        wait_all(
            dependencies
                .iter()
                .filter_map(|id| graph.unit(*id))
                .map(Unit::signal),
        )
        .await;
    }

    let _permit = slots.acquire().await.map_err(|_| PipelineError::Aborted)?;
    let payload = BatchPayload::build(graph, batch);

    let outcome = match tokio::time::timeout(timeout, port.analyze(&payload)).await {
        Ok(Ok(result)) => BatchOutcome::Analyzed(result),
        Ok(Err(err)) => {
            warn!(batch_id = %batch.id, error = %err, "Analysis failed, degrading batch");
            BatchOutcome::Degraded(err)
        }
        Err(_) => {
            warn!(
                batch_id = %batch.id,
                seconds = timeout.as_secs(),
                "Analysis timed out, degrading batch"
            );
            BatchOutcome::Degraded(AnalysisCallError::Timeout {
                seconds: timeout.as_secs(),
            })
        }
    };
    Ok(outcome)
}
