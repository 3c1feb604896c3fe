//! Token-budgeted grouping of units into dispatch batches
//!
//! Sibling leaf units are packed together until the next one would push the
//! accumulated weight over the limit; a leaf under a different parent starts
//! a new batch. A unit with children always forms its own singleton batch,
//! and any pending leaves are flushed before it. Because units arrive in
//! post-order, every batch holding a descendant of a parent gets a smaller id
//! than the parent's singleton batch.

use crate::unit::{Unit, UnitGraph, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u32);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub id: BatchId,
    pub units: Vec<UnitId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn token_weight(&self, graph: &UnitGraph) -> usize {
        self.resolve(graph).map(|unit| unit.token_weight).sum()
    }

    /// Units eligible for structured-data extraction
    pub fn leaf_data_units<'g>(&'g self, graph: &'g UnitGraph) -> impl Iterator<Item = &'g Unit> {
        self.resolve(graph).filter(|unit| unit.is_leaf_data_unit)
    }

    /// Children whose completion must be observed before this batch is analyzed
    pub fn dependencies(&self, graph: &UnitGraph) -> Vec<UnitId> {
        self.resolve(graph)
            .filter(|unit| unit.has_children)
            .flat_map(|unit| unit.children.iter().copied())
            .collect()
    }

    fn resolve<'g>(&'g self, graph: &'g UnitGraph) -> impl Iterator<Item = &'g Unit> {
        self.units.iter().filter_map(move |id| graph.unit(*id))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    token_limit: usize,
}

impl BatchPlanner {
    pub fn new(token_limit: usize) -> Self {
        Self { token_limit }
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn plan(&self, units: &[Unit]) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut pending: Vec<UnitId> = Vec::new();
        let mut pending_weight = 0usize;
        let mut pending_parent: Option<UnitId> = None;

        for unit in units.iter().filter(|unit| unit.analyzable) {
            if unit.has_children {
                flush(&mut batches, &mut pending);
                push_batch(&mut batches, vec![unit.id]);
                continue;
            }

            let over_budget = pending_weight + unit.token_weight > self.token_limit;
            if !pending.is_empty() && (over_budget || pending_parent != unit.parent) {
                flush(&mut batches, &mut pending);
            }
            if pending.is_empty() {
                pending_weight = 0;
                pending_parent = unit.parent;
            }
            pending.push(unit.id);
            pending_weight += unit.token_weight;
        }

        flush(&mut batches, &mut pending);
        batches
    }
}

fn push_batch(batches: &mut Vec<Batch>, units: Vec<UnitId>) {
    let id = BatchId(batches.len() as u32 + 1);
    batches.push(Batch { id, units });
}

fn flush(batches: &mut Vec<Batch>, pending: &mut Vec<UnitId>) {
    if !pending.is_empty() {
        push_batch(batches, std::mem::take(pending));
    }
}
