//! Deterministic in-process ports for tests and dry runs

use super::{
    AggregationPort, AggregationRequest, AnalysisPort, BatchPayload, DataAccess, DataEntity,
    StructuredData, UnitAnalysis,
};
use crate::batch::BatchId;
use crate::error::{AggregationError, AnalysisCallError};
use crate::unit::{AggregateKey, UnitKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Analysis port that answers `"<KIND> <range>"` for every unit
#[derive(Debug, Default)]
pub struct MockAnalysisPort {
    delays: HashMap<BatchId, Duration>,
    default_delay: Duration,
    failing: HashSet<BatchId>,
    calls: Mutex<Vec<(BatchId, Instant)>>,
    data_calls: AtomicUsize,
}

impl MockAnalysisPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, batch: BatchId, delay: Duration) -> Self {
        self.delays.insert(batch, delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn failing(mut self, batch: BatchId) -> Self {
        self.failing.insert(batch);
        self
    }

    /// Batches in the order their analysis started
    pub fn calls(&self) -> Vec<BatchId> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(batch_id, _)| *batch_id)
            .collect()
    }

    /// When analysis of a batch started, on the tokio clock
    pub fn dispatched_at(&self, batch: BatchId) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(batch_id, _)| *batch_id == batch)
            .map(|(_, at)| *at)
    }

    pub fn data_calls(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisPort for MockAnalysisPort {
    async fn analyze_units(
        &self,
        payload: &BatchPayload,
    ) -> Result<Vec<UnitAnalysis>, AnalysisCallError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((payload.batch_id, Instant::now()));

        let delay = self
            .delays
            .get(&payload.batch_id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(&payload.batch_id) {
            return Err(AnalysisCallError::Other(format!(
                "mock failure for batch {}",
                payload.batch_id
            )));
        }

        Ok(payload
            .units
            .iter()
            .map(|unit| UnitAnalysis {
                unit_id: unit.unit_id,
                summary: format!("{} {}", unit.kind, unit.range),
            })
            .collect())
    }

    async fn extract_data(
        &self,
        payload: &BatchPayload,
    ) -> Result<Option<StructuredData>, AnalysisCallError> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        let entities = payload
            .leaf_data_units()
            .map(|unit| DataEntity {
                unit_id: unit.unit_id,
                name: format!("T{}", unit.unit_id.0),
                access: if unit.kind == UnitKind::Select {
                    DataAccess::Read
                } else {
                    DataAccess::Write
                },
                columns: Vec::new(),
            })
            .collect();
        Ok(Some(StructuredData { entities }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Aggregation port that lists what it was given
#[derive(Debug, Default)]
pub struct MockAggregationPort {
    failing: HashSet<AggregateKey>,
    delay: Duration,
    calls: Mutex<HashMap<AggregateKey, usize>>,
    requests: Mutex<Vec<AggregationRequest>>,
}

impl MockAggregationPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, key: AggregateKey) -> Self {
        self.failing.insert(key);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_for(&self, key: AggregateKey) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    pub fn requests(&self) -> Vec<AggregationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AggregationPort for MockAggregationPort {
    async fn summarize(&self, request: &AggregationRequest) -> Result<String, AggregationError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(request.key)
            .or_insert(0) += 1;
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&request.key) {
            return Err(AggregationError::InvalidResponse {
                message: format!("mock failure for aggregate {}", request.key),
            });
        }

        let parts: Vec<&str> = request.units.values().map(|e| e.summary.as_str()).collect();
        Ok(format!("{} {}: {}", request.kind, request.name, parts.join("; ")))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
