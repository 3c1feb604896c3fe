use super::{AggregateRecord, DataEntityRecord, Mutation, MutationSet, UnitRecord};
use crate::error::GraphApplyError;
use crate::ports::GraphPort;
use crate::unit::{AggregateKey, UnitId};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

type UnitKey = (String, UnitId);
type EntityKey = (String, UnitId, String);
type AggregateRecordKey = (String, AggregateKey);

#[derive(Debug, Default)]
struct GraphState {
    units: BTreeMap<UnitKey, UnitRecord>,
    entities: BTreeMap<EntityKey, DataEntityRecord>,
    aggregates: BTreeMap<AggregateRecordKey, AggregateRecord>,
    attempts: usize,
    writes: usize,
}

#[derive(Debug, Default)]
struct FailurePlan {
    next: usize,
    units: HashSet<UnitId>,
}

/// In-process property graph with upsert semantics
///
/// A mutation set is applied atomically: either every record lands or, on an
/// injected failure, none does.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
    failures: Mutex<FailurePlan>,
}

/// Serializable copy of the store contents, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub units: Vec<UnitRecord>,
    pub data_entities: Vec<DataEntityRecord>,
    pub aggregates: Vec<AggregateRecord>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` apply calls with [`GraphApplyError::Unavailable`]
    pub fn fail_next(&self, count: usize) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).next = count;
    }

    /// Rejects every mutation set touching `unit_id`, in any file
    pub fn fail_on_unit(&self, unit_id: UnitId) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .units
            .insert(unit_id);
    }

    pub fn unit_count(&self) -> usize {
        self.lock_state().units.len()
    }

    pub fn entity_count(&self) -> usize {
        self.lock_state().entities.len()
    }

    pub fn aggregate_count(&self) -> usize {
        self.lock_state().aggregates.len()
    }

    /// Successful apply calls
    pub fn write_count(&self) -> usize {
        self.lock_state().writes
    }

    /// All apply calls, including failed ones
    pub fn attempt_count(&self) -> usize {
        self.lock_state().attempts
    }

    pub fn unit(&self, file: &str, unit_id: UnitId) -> Option<UnitRecord> {
        self.lock_state()
            .units
            .get(&(file.to_string(), unit_id))
            .cloned()
    }

    pub fn unit_summary(&self, file: &str, unit_id: UnitId) -> Option<String> {
        self.unit(file, unit_id).map(|record| record.summary)
    }

    pub fn aggregate_summary(&self, file: &str, key: AggregateKey) -> Option<String> {
        self.lock_state()
            .aggregates
            .get(&(file.to_string(), key))
            .map(|record| record.summary.clone())
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.lock_state();
        GraphSnapshot {
            units: state.units.values().cloned().collect(),
            data_entities: state.entities.values().cloned().collect(),
            aggregates: state.aggregates.values().cloned().collect(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn injected_failure(&self, mutations: &MutationSet) -> Option<GraphApplyError> {
        let mut plan = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if plan.next > 0 {
            plan.next -= 1;
            return Some(GraphApplyError::Unavailable {
                message: "injected outage".to_string(),
            });
        }
        mutations
            .iter()
            .filter_map(Mutation::unit_id)
            .find(|id| plan.units.contains(id))
            .map(|id| GraphApplyError::Rejected {
                message: format!("write for unit {} rejected", id),
            })
    }
}

#[async_trait]
impl GraphPort for MemoryGraph {
    async fn apply_mutations(&self, mutations: &MutationSet) -> Result<(), GraphApplyError> {
        let failure = self.injected_failure(mutations);

        let mut state = self.lock_state();
        state.attempts += 1;
        if let Some(err) = failure {
            warn!(error = %err, mutations = mutations.len(), "Graph write failed");
            return Err(err);
        }

        for mutation in mutations.iter() {
            match mutation {
                Mutation::UpsertUnit(record) => {
                    state
                        .units
                        .insert((record.file.clone(), record.unit_id), record.clone());
                }
                Mutation::UpsertDataEntity(record) => {
                    state.entities.insert(
                        (record.file.clone(), record.unit_id, record.name.clone()),
                        record.clone(),
                    );
                }
                Mutation::UpsertAggregate(record) => {
                    state
                        .aggregates
                        .insert((record.file.clone(), record.key), record.clone());
                }
            }
        }
        state.writes += 1;
        debug!(mutations = mutations.len(), "Applied mutation set");
        Ok(())
    }
}
