//! In-order commit of batch outcomes
//!
//! Batches finish analysis in any order but are committed strictly by id.
//! Outcomes wait in a slot arena indexed by `id - first` until every lower id
//! has been committed. Completion signals fire only after the graph write
//! for their batch succeeded, so a parent is never analyzed against a child
//! summary that is not durable.

use super::report::DegradedBatch;
use crate::batch::{Batch, BatchId};
use crate::error::{AnalysisCallError, GraphApplyError, PipelineError};
use crate::graph::{DataEntityRecord, Mutation, MutationSet, UnitRecord};
use crate::ports::{AnalysisResult, GraphPort};
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::unit::{AggregateKey, UnitGraph, UnitId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

/// What the dispatcher hands over for one batch
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Analyzed(AnalysisResult),
    /// Analysis failed or timed out; units are applied with empty summaries
    Degraded(AnalysisCallError),
}

impl BatchOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, BatchOutcome::Degraded(_))
    }
}

#[derive(Debug)]
struct PendingBuffer {
    first: u32,
    next: u32,
    slots: Vec<Option<(Batch, BatchOutcome)>>,
}

impl PendingBuffer {
    fn new(first: BatchId, count: usize) -> Self {
        Self {
            first: first.0,
            next: first.0,
            slots: (0..count).map(|_| None).collect(),
        }
    }

    fn insert(&mut self, batch: Batch, outcome: BatchOutcome) -> Result<(), PipelineError> {
        let id = batch.id;
        if id.0 < self.next {
            return Err(PipelineError::UnexpectedBatch(id));
        }
        let slot = id
            .0
            .checked_sub(self.first)
            .and_then(|offset| self.slots.get_mut(offset as usize))
            .ok_or(PipelineError::UnexpectedBatch(id))?;
        if slot.is_some() {
            return Err(PipelineError::UnexpectedBatch(id));
        }
        *slot = Some((batch, outcome));
        Ok(())
    }

    /// Removes the outcome for `next` if it has arrived
    fn take_next(&mut self) -> Option<(Batch, BatchOutcome)> {
        let offset = (self.next - self.first) as usize;
        self.slots.get_mut(offset)?.take()
    }

    fn advance(&mut self) {
        self.next += 1;
    }

    fn next_expected(&self) -> BatchId {
        BatchId(self.next)
    }

    fn is_drained(&self) -> bool {
        (self.next - self.first) as usize >= self.slots.len()
    }
}

#[derive(Debug)]
struct ApplyState {
    buffer: PendingBuffer,
    failed: Option<(BatchId, GraphApplyError)>,
    applied: usize,
    degraded: Vec<DegradedBatch>,
    ready_aggregates: Option<mpsc::UnboundedSender<AggregateKey>>,
    undelivered: Vec<AggregateKey>,
}

/// Snapshot of commit progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied_batches: usize,
    pub degraded: Vec<DegradedBatch>,
    pub next_expected: BatchId,
    pub complete: bool,
    /// Ready aggregates that could not be handed to a closed aggregator
    pub undelivered_aggregates: Vec<AggregateKey>,
}

pub struct Applier {
    file: String,
    graph: Arc<UnitGraph>,
    store: Arc<dyn GraphPort>,
    progress: Arc<dyn ProgressHandler>,
    retry_backoff: Duration,
    state: Mutex<ApplyState>,
}

impl Applier {
    /// Expects batches `1..=batch_count`. Keys of aggregates whose last unit
    /// was committed are sent on `ready_aggregates`.
    pub fn new(
        file: impl Into<String>,
        graph: Arc<UnitGraph>,
        batch_count: usize,
        store: Arc<dyn GraphPort>,
        progress: Arc<dyn ProgressHandler>,
        retry_backoff: Duration,
        ready_aggregates: mpsc::UnboundedSender<AggregateKey>,
    ) -> Self {
        Self {
            file: file.into(),
            graph,
            store,
            progress,
            retry_backoff,
            state: Mutex::new(ApplyState {
                buffer: PendingBuffer::new(BatchId(1), batch_count),
                failed: None,
                applied: 0,
                degraded: Vec::new(),
                ready_aggregates: Some(ready_aggregates),
                undelivered: Vec::new(),
            }),
        }
    }

    /// Buffers an outcome and commits every batch that is now contiguous.
    /// Safe to call from many tasks at once.
    pub async fn submit(&self, batch: Batch, outcome: BatchOutcome) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        if state.failed.is_some() {
            return Err(PipelineError::Aborted);
        }
        state.buffer.insert(batch, outcome)?;

        while let Some((batch, outcome)) = state.buffer.take_next() {
            if let Err(source) = self.commit(&batch, &outcome).await {
                error!(
                    file = %self.file,
                    batch_id = %batch.id,
                    error = %source,
                    "Graph write failed after retry, stopping run"
                );
                state.failed = Some((batch.id, source.clone()));
                return Err(PipelineError::GraphApply {
                    batch_id: batch.id,
                    source,
                });
            }
            self.publish(&mut state, &batch, outcome);
            state.buffer.advance();
        }
        Ok(())
    }

    /// Stops forwarding ready aggregates; the aggregator drains what it has
    pub async fn close(&self) {
        self.state.lock().await.ready_aggregates = None;
    }

    pub async fn stats(&self) -> ApplyStats {
        let state = self.state.lock().await;
        ApplyStats {
            applied_batches: state.applied,
            degraded: state.degraded.clone(),
            next_expected: state.buffer.next_expected(),
            complete: state.buffer.is_drained(),
            undelivered_aggregates: state.undelivered.clone(),
        }
    }

    /// The write failure that stopped the run, if any
    pub async fn fatal_error(&self) -> Option<PipelineError> {
        self.state
            .lock()
            .await
            .failed
            .clone()
            .map(|(batch_id, source)| PipelineError::GraphApply { batch_id, source })
    }

    async fn commit(&self, batch: &Batch, outcome: &BatchOutcome) -> Result<(), GraphApplyError> {
        let result = match outcome {
            BatchOutcome::Analyzed(result) => result,
            BatchOutcome::Degraded(_) => return Ok(()),
        };
        let mutations = self.mutations(batch, result);

        match self.store.apply_mutations(&mutations).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    file = %self.file,
                    batch_id = %batch.id,
                    error = %err,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "Graph write failed, retrying once"
                );
                tokio::time::sleep(self.retry_backoff).await;
                self.store.apply_mutations(&mutations).await
            }
        }
    }

    fn mutations(&self, batch: &Batch, result: &AnalysisResult) -> MutationSet {
        let summaries: HashMap<UnitId, &str> = result
            .units
            .iter()
            .map(|analysis| (analysis.unit_id, analysis.summary.as_str()))
            .collect();

        let mut set = MutationSet::new();
        for unit in batch.units.iter().filter_map(|id| self.graph.unit(*id)) {
            set.push(Mutation::UpsertUnit(UnitRecord {
                file: self.file.clone(),
                unit_id: unit.id,
                kind: unit.kind,
                range: unit.range,
                name: unit.name.clone(),
                summary: summaries.get(&unit.id).copied().unwrap_or_default().to_string(),
                aggregate: unit.aggregate,
                parent: unit.parent,
            }));
        }
        if let Some(data) = &result.data {
            for entity in &data.entities {
                set.push(Mutation::UpsertDataEntity(DataEntityRecord {
                    file: self.file.clone(),
                    unit_id: entity.unit_id,
                    name: entity.name.clone(),
                    access: entity.access,
                    columns: entity.columns.clone(),
                }));
            }
        }
        set
    }

    /// In-memory effects of a durable commit
    fn publish(&self, state: &mut ApplyState, batch: &Batch, outcome: BatchOutcome) {
        let degraded = outcome.is_degraded();
        let mut summaries: HashMap<UnitId, String> = match outcome {
            BatchOutcome::Analyzed(result) => result
                .units
                .into_iter()
                .map(|analysis| (analysis.unit_id, analysis.summary))
                .collect(),
            BatchOutcome::Degraded(err) => {
                state.degraded.push(DegradedBatch {
                    batch_id: batch.id,
                    units: batch.units.clone(),
                    error: err.to_string(),
                });
                HashMap::new()
            }
        };

        for unit in batch.units.iter().filter_map(|id| self.graph.unit(*id)) {
            if !unit.set_summary(summaries.remove(&unit.id).unwrap_or_default()) {
                warn!(file = %self.file, unit_id = %unit.id, "Unit applied twice");
            }
            self.progress.on_progress(&ProgressEvent::UnitApplied {
                file: self.file.clone(),
                unit_id: unit.id,
                batch_id: batch.id,
                degraded,
                at: Utc::now(),
            });
            unit.signal().fire();

            let Some(key) = unit.aggregate else { continue };
            let reached_zero = self
                .graph
                .aggregate(key)
                .map(|aggregate| aggregate.release_one())
                .unwrap_or(false);
            if reached_zero {
                debug!(file = %self.file, aggregate = %key, "Aggregate ready to finalize");
                if let Some(tx) = &state.ready_aggregates {
                    if tx.send(key).is_err() {
                        warn!(
                            file = %self.file,
                            aggregate = %key,
                            "Aggregator is gone, aggregate will not be finalized"
                        );
                        state.undelivered.push(key);
                    }
                }
            }
        }

        state.applied += 1;
        self.progress.on_progress(&ProgressEvent::BatchApplied {
            file: self.file.clone(),
            batch_id: batch.id,
            units: batch.len(),
            degraded,
            at: Utc::now(),
        });
        debug!(file = %self.file, batch_id = %batch.id, degraded, "Batch committed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::pipeline::test_support::{analyzed, procedure_example};
    use crate::progress::{ProgressKind, RecordingHandler};

    struct Fixture {
        graph: Arc<UnitGraph>,
        batches: Vec<Batch>,
        store: Arc<MemoryGraph>,
        progress: Arc<RecordingHandler>,
        applier: Applier,
        ready: mpsc::UnboundedReceiver<AggregateKey>,
    }

    fn fixture() -> Fixture {
        let (graph, batches) = procedure_example();
        let store = Arc::new(MemoryGraph::new());
        let progress = Arc::new(RecordingHandler::new());
        let (tx, ready) = mpsc::unbounded_channel();
        let applier = Applier::new(
            "proc.sql",
            graph.clone(),
            batches.len(),
            store.clone(),
            progress.clone(),
            Duration::ZERO,
            tx,
        );
        Fixture {
            graph,
            batches,
            store,
            progress,
            applier,
            ready,
        }
    }

    fn committed_batches(progress: &RecordingHandler) -> Vec<BatchId> {
        progress
            .of_kind(ProgressKind::BatchApplied)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::BatchApplied { batch_id, .. } => Some(batch_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_out_of_order_submissions_commit_in_order() {
        let mut fx = fixture();
        let b = fx.batches.clone();

        fx.applier.submit(b[2].clone(), analyzed(&fx.graph, &b[2])).await.unwrap();
        fx.applier.submit(b[1].clone(), analyzed(&fx.graph, &b[1])).await.unwrap();
        assert!(committed_batches(&fx.progress).is_empty());
        assert!(!fx.graph.unit(UnitId(2)).unwrap().signal().is_fired());

        fx.applier.submit(b[0].clone(), analyzed(&fx.graph, &b[0])).await.unwrap();
        assert_eq!(
            committed_batches(&fx.progress),
            vec![BatchId(1), BatchId(2), BatchId(3)]
        );
        assert!(fx.graph.unit(UnitId(3)).unwrap().signal().is_fired());
        assert_eq!(fx.store.write_count(), 3);

        fx.applier.submit(b[3].clone(), analyzed(&fx.graph, &b[3])).await.unwrap();
        let stats = fx.applier.stats().await;
        assert!(stats.complete);
        assert_eq!(stats.applied_batches, 4);
        assert_eq!(fx.ready.recv().await, Some(crate::unit::AggregateKey(1)));
    }

    #[tokio::test]
    async fn test_closed_aggregator_does_not_block_commits() {
        let fx = fixture();
        drop(fx.ready);

        for batch in &fx.batches {
            fx.applier
                .submit(batch.clone(), analyzed(&fx.graph, batch))
                .await
                .unwrap();
        }

        let stats = fx.applier.stats().await;
        assert!(stats.complete);
        assert_eq!(stats.applied_batches, 4);
        assert_eq!(stats.undelivered_aggregates, vec![crate::unit::AggregateKey(1)]);
    }

    #[tokio::test]
    async fn test_duplicate_and_out_of_range_batches_are_rejected() {
        let fx = fixture();
        let b = fx.batches.clone();

        fx.applier.submit(b[1].clone(), analyzed(&fx.graph, &b[1])).await.unwrap();
        let dup = fx.applier.submit(b[1].clone(), analyzed(&fx.graph, &b[1])).await;
        assert!(matches!(dup, Err(PipelineError::UnexpectedBatch(BatchId(2)))));

        let stray = Batch {
            id: BatchId(9),
            units: vec![UnitId(1)],
        };
        let result = fx
            .applier
            .submit(stray, BatchOutcome::Analyzed(AnalysisResult::default()))
            .await;
        assert!(matches!(result, Err(PipelineError::UnexpectedBatch(BatchId(9)))));
    }

    #[tokio::test]
    async fn test_degraded_batch_writes_nothing_but_fires_signals() {
        let fx = fixture();
        let b = fx.batches.clone();

        let outcome = BatchOutcome::Degraded(AnalysisCallError::Timeout { seconds: 1 });
        fx.applier.submit(b[0].clone(), outcome).await.unwrap();

        let select = fx.graph.unit(UnitId(1)).unwrap();
        assert!(select.signal().is_fired());
        assert_eq!(select.summary(), Some(""));
        assert_eq!(fx.store.attempt_count(), 0);

        let stats = fx.applier.stats().await;
        assert_eq!(stats.degraded.len(), 1);
        assert_eq!(stats.degraded[0].batch_id, BatchId(1));
        assert!(stats.degraded[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_single_write_failure_is_retried() {
        let fx = fixture();
        let b = fx.batches.clone();
        fx.store.fail_next(1);

        fx.applier.submit(b[0].clone(), analyzed(&fx.graph, &b[0])).await.unwrap();
        assert_eq!(fx.store.attempt_count(), 2);
        assert!(fx.store.unit_summary("proc.sql", UnitId(1)).is_some());
    }

    #[tokio::test]
    async fn test_persistent_write_failure_is_fatal() {
        let fx = fixture();
        let b = fx.batches.clone();
        fx.store.fail_on_unit(UnitId(2));

        fx.applier.submit(b[0].clone(), analyzed(&fx.graph, &b[0])).await.unwrap();
        let err = fx
            .applier
            .submit(b[1].clone(), analyzed(&fx.graph, &b[1]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::GraphApply {
                batch_id: BatchId(2),
                ..
            }
        ));
        assert!(!fx.graph.unit(UnitId(2)).unwrap().signal().is_fired());

        let later = fx.applier.submit(b[2].clone(), analyzed(&fx.graph, &b[2])).await;
        assert!(matches!(later, Err(PipelineError::Aborted)));
        assert!(fx.applier.fatal_error().await.is_some());
        assert_eq!(fx.applier.stats().await.next_expected, BatchId(2));
    }

    #[tokio::test]
    async fn test_data_entities_are_written_with_units() {
        let fx = fixture();
        let b = fx.batches.clone();

        fx.applier.submit(b[0].clone(), analyzed(&fx.graph, &b[0])).await.unwrap();
        assert_eq!(fx.store.entity_count(), 1);
        assert_eq!(fx.store.snapshot().data_entities[0].unit_id, UnitId(1));
    }

    #[tokio::test]
    async fn test_commit_sends_one_mutation_set_per_attempt() {
        use crate::ports::MockGraphPort;
        use mockall::Sequence;

        let (graph, batches) = procedure_example();
        let mut store = MockGraphPort::new();
        let mut sequence = Sequence::new();
        store
            .expect_apply_mutations()
            .withf(|mutations| mutations.len() == 2)
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| {
                Err(GraphApplyError::Unavailable {
                    message: "connection reset".to_string(),
                })
            });
        store
            .expect_apply_mutations()
            .withf(|mutations| mutations.len() == 2)
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));

        let (tx, _ready) = mpsc::unbounded_channel();
        let applier = Applier::new(
            "proc.sql",
            graph.clone(),
            batches.len(),
            Arc::new(store),
            Arc::new(crate::progress::NoOpHandler),
            Duration::ZERO,
            tx,
        );

        // Batch 1 is the SELECT leaf: its unit plus one data entity
        let first = batches[0].clone();
        applier
            .submit(first.clone(), analyzed(&graph, &first))
            .await
            .unwrap();
        assert_eq!(applier.stats().await.applied_batches, 1);
    }
}
