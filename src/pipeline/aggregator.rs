//! Holistic summaries for aggregates whose units are all applied
//!
//! The applier sends an aggregate key once its pending count reaches zero.
//! Each key is finalized at most once: `Open → ReadyToFinalize → Finalized`.
//! A second trigger for the same aggregate is a scheduling bug and is
//! reported, never retried.

use super::report::AggregationFailure;
use crate::error::AggregationError;
use crate::graph::{AggregateRecord, Mutation, MutationSet};
use crate::ports::{AggregationPort, AggregationRequest, GraphPort};
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::unit::{AggregateKey, AggregateState, UnitGraph};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationStats {
    pub finalized: usize,
    pub failures: Vec<AggregationFailure>,
}

pub struct Aggregator {
    file: String,
    graph: Arc<UnitGraph>,
    port: Arc<dyn AggregationPort>,
    store: Arc<dyn GraphPort>,
    progress: Arc<dyn ProgressHandler>,
    slots: Arc<Semaphore>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        file: impl Into<String>,
        graph: Arc<UnitGraph>,
        port: Arc<dyn AggregationPort>,
        store: Arc<dyn GraphPort>,
        progress: Arc<dyn ProgressHandler>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            file: file.into(),
            graph,
            port,
            store,
            progress,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Finalizes every key received until the channel closes
    pub async fn run(self: Arc<Self>, mut ready: mpsc::UnboundedReceiver<AggregateKey>) -> AggregationStats {
        let mut tasks = JoinSet::new();
        let mut stats = AggregationStats::default();

        loop {
            tokio::select! {
                key = ready.recv() => match key {
                    Some(key) => {
                        let this = self.clone();
                        tasks.spawn(async move { (key, this.on_pending_zero(key).await) });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.record(&mut stats, joined);
                }
            }
        }
        while let Some(joined) = tasks.join_next().await {
            self.record(&mut stats, joined);
        }
        stats
    }

    /// Summarizes one aggregate and stores the result on its graph record
    pub async fn on_pending_zero(&self, key: AggregateKey) -> Result<String, AggregationError> {
        let aggregate = self
            .graph
            .aggregate(key)
            .ok_or(AggregationError::UnknownAggregate(key))?;
        if aggregate.state() == AggregateState::Open {
            return Err(AggregationError::NotReady(key));
        }
        if !aggregate.claim_finalize() {
            error!(
                file = %self.file,
                aggregate = %key,
                state = ?aggregate.state(),
                "Finalization triggered twice"
            );
            return Err(AggregationError::AlreadyFinalized(key));
        }

        let result = self.summarize_and_store(key).await;
        aggregate.finish(result.as_ref().ok().cloned());
        self.progress.on_progress(&ProgressEvent::AggregateFinalized {
            file: self.file.clone(),
            key,
            name: aggregate.name.clone(),
            success: result.is_ok(),
            at: Utc::now(),
        });
        result
    }

    async fn summarize_and_store(&self, key: AggregateKey) -> Result<String, AggregationError> {
        let aggregate = self
            .graph
            .aggregate(key)
            .ok_or(AggregationError::UnknownAggregate(key))?;
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| AggregationError::InvalidResponse {
                message: "aggregation slots closed".to_string(),
            })?;

        let request = AggregationRequest::collect(&self.graph, aggregate);
        let summary = tokio::time::timeout(self.timeout, self.port.summarize(&request))
            .await
            .map_err(|_| AggregationError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        let mutations: MutationSet = std::iter::once(Mutation::UpsertAggregate(AggregateRecord {
            file: self.file.clone(),
            key,
            kind: aggregate.kind,
            name: aggregate.name.clone(),
            range: aggregate.range,
            summary: summary.clone(),
        }))
        .collect();
        self.store.apply_mutations(&mutations).await?;

        info!(
            file = %self.file,
            aggregate = %key,
            name = %aggregate.name,
            units = request.units.len(),
            "Aggregate summarized"
        );
        Ok(summary)
    }

    fn record(
        &self,
        stats: &mut AggregationStats,
        joined: Result<(AggregateKey, Result<String, AggregationError>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((_, Ok(_))) => stats.finalized += 1,
            Ok((key, Err(err))) => {
                warn!(file = %self.file, aggregate = %key, error = %err, "Aggregation failed");
                let name = self
                    .graph
                    .aggregate(key)
                    .map(|aggregate| aggregate.name.clone())
                    .unwrap_or_default();
                stats.failures.push(AggregationFailure {
                    key,
                    name,
                    error: err.to_string(),
                });
            }
            Err(err) => {
                error!(file = %self.file, error = %err, "Aggregation task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::pipeline::test_support::procedure_example;
    use crate::ports::MockAggregationPort;
    use crate::progress::NoOpHandler;
    use crate::unit::UnitId;

    fn aggregator(
        graph: Arc<UnitGraph>,
        port: Arc<MockAggregationPort>,
        store: Arc<MemoryGraph>,
    ) -> Arc<Aggregator> {
        Arc::new(Aggregator::new(
            "proc.sql",
            graph,
            port,
            store,
            Arc::new(NoOpHandler),
            2,
            Duration::from_secs(5),
        ))
    }

    fn apply_all(graph: &UnitGraph) {
        for unit in graph.units() {
            unit.set_summary(format!("summary of {}", unit.id));
            if let Some(aggregate) = unit.aggregate.and_then(|key| graph.aggregate(key)) {
                aggregate.release_one();
            }
        }
    }

    #[tokio::test]
    async fn test_finalizes_once_and_stores_summary() {
        let (graph, _) = procedure_example();
        apply_all(&graph);
        let port = Arc::new(MockAggregationPort::new());
        let store = Arc::new(MemoryGraph::new());
        let aggregator = aggregator(graph.clone(), port.clone(), store.clone());

        let summary = aggregator.on_pending_zero(AggregateKey(1)).await.unwrap();
        assert!(summary.contains("summary of u1"));
        assert_eq!(
            store.aggregate_summary("proc.sql", AggregateKey(1)),
            Some(summary.clone())
        );

        let again = aggregator.on_pending_zero(AggregateKey(1)).await;
        assert!(matches!(again, Err(AggregationError::AlreadyFinalized(_))));
        assert_eq!(port.calls_for(AggregateKey(1)), 1);

        let aggregate = graph.aggregate(AggregateKey(1)).unwrap();
        assert_eq!(aggregate.state(), AggregateState::Finalized);
        assert_eq!(aggregate.summary(), Some(summary.as_str()));
    }

    #[tokio::test]
    async fn test_request_is_keyed_by_unit_id() {
        let (graph, _) = procedure_example();
        apply_all(&graph);
        let port = Arc::new(MockAggregationPort::new());
        let aggregator = aggregator(graph, port.clone(), Arc::new(MemoryGraph::new()));

        aggregator.on_pending_zero(AggregateKey(1)).await.unwrap();
        let request = &port.requests()[0];
        let ids: Vec<UnitId> = request.units.keys().copied().collect();
        assert_eq!(ids, vec![UnitId(1), UnitId(2), UnitId(3), UnitId(4)]);
    }

    #[tokio::test]
    async fn test_open_aggregate_is_not_finalized() {
        let (graph, _) = procedure_example();
        let port = Arc::new(MockAggregationPort::new());
        let aggregator = aggregator(graph, port.clone(), Arc::new(MemoryGraph::new()));

        let result = aggregator.on_pending_zero(AggregateKey(1)).await;
        assert!(matches!(result, Err(AggregationError::NotReady(_))));
        assert_eq!(port.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_non_fatal() {
        let (graph, _) = procedure_example();
        apply_all(&graph);
        let port = Arc::new(MockAggregationPort::new().failing(AggregateKey(1)));
        let store = Arc::new(MemoryGraph::new());
        let aggregator = aggregator(graph.clone(), port, store.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(AggregateKey(1)).unwrap();
        tx.send(AggregateKey(7)).unwrap();
        drop(tx);

        let stats = aggregator.run(rx).await;
        assert_eq!(stats.finalized, 0);
        assert_eq!(stats.failures.len(), 2);
        assert_eq!(store.aggregate_count(), 0);
        assert_eq!(
            graph.aggregate(AggregateKey(1)).unwrap().state(),
            AggregateState::Finalized
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_summary_times_out() {
        let (graph, _) = procedure_example();
        apply_all(&graph);
        let port = Arc::new(MockAggregationPort::new().with_delay(Duration::from_secs(60)));
        let aggregator = aggregator(graph, port, Arc::new(MemoryGraph::new()));

        let result = aggregator.on_pending_zero(AggregateKey(1)).await;
        assert!(matches!(result, Err(AggregationError::Timeout { seconds: 5 })));
    }
}
