//! Analyzable units and the aggregates that own them
//!
//! A [`UnitGraph`] is the flattened, post-order form of a parsed syntax tree.
//! Every [`Unit`] carries a one-shot [`CompletionSignal`] and a summary slot
//! that the applier fills once the unit's batch is committed. Units are
//! grouped under [`Aggregate`]s (procedure, function, trigger, package) which
//! receive one holistic summary after all of their units are applied.

pub mod builder;
mod kind;
mod signal;

pub use builder::UnitBuilder;
pub use kind::{KindBehavior, UnitKind};
pub use signal::{wait_all, CompletionSignal};

use crate::tree::SourceText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::error;

/// Post-order position of a unit, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl UnitId {
    pub(crate) fn index(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Identifier of an aggregate, assigned when its root is first visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateKey(pub u32);

impl AggregateKey {
    pub(crate) fn index(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Inclusive, 1-based line span
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    /// Returns `None` for an inverted span
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn line_count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, other: &LineRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.start, self.end)
    }
}

/// One analyzable or structural span of source
#[derive(Debug)]
pub struct Unit {
    pub id: UnitId,
    pub range: LineRange,
    pub kind: UnitKind,
    pub name: Option<String>,
    pub token_weight: usize,
    pub has_children: bool,
    pub analyzable: bool,
    pub is_leaf_data_unit: bool,
    pub aggregate: Option<AggregateKey>,
    pub parent: Option<UnitId>,
    pub children: Vec<UnitId>,
    signal: CompletionSignal,
    summary: OnceLock<String>,
}

impl Unit {
    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// Summary committed by the applier; empty for degraded batches
    pub fn summary(&self) -> Option<&str> {
        self.summary.get().map(String::as_str)
    }

    pub(crate) fn set_summary(&self, summary: String) -> bool {
        self.summary.set(summary).is_ok()
    }
}

/// Lifecycle of an aggregate's holistic summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    Open,
    ReadyToFinalize,
    Finalized,
}

impl AggregateState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AggregateState::Open,
            1 => AggregateState::ReadyToFinalize,
            _ => AggregateState::Finalized,
        }
    }
}

/// Procedure/function/class-level grouping of units
#[derive(Debug)]
pub struct Aggregate {
    pub key: AggregateKey,
    pub kind: UnitKind,
    pub name: String,
    pub range: LineRange,
    pub root: UnitId,
    pending: AtomicUsize,
    state: AtomicU8,
    claimed: AtomicBool,
    summary: OnceLock<String>,
}

impl Aggregate {
    pub(crate) fn new(
        key: AggregateKey,
        kind: UnitKind,
        name: String,
        range: LineRange,
        root: UnitId,
        pending: usize,
    ) -> Self {
        let state = if pending == 0 {
            AggregateState::ReadyToFinalize
        } else {
            AggregateState::Open
        };
        Self {
            key,
            kind,
            name,
            range,
            root,
            pending: AtomicUsize::new(pending),
            state: AtomicU8::new(state as u8),
            claimed: AtomicBool::new(false),
            summary: OnceLock::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn state(&self) -> AggregateState {
        AggregateState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.get().map(String::as_str)
    }

    /// Records one applied unit. Returns true exactly when the count reaches zero.
    pub(crate) fn release_one(&self) -> bool {
        match self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.state
                    .store(AggregateState::ReadyToFinalize as u8, Ordering::Release);
                true
            }
            Ok(_) => false,
            Err(_) => {
                error!(aggregate = %self.key, name = %self.name, "Pending count underflow");
                false
            }
        }
    }

    /// One-shot guard for finalization
    pub(crate) fn claim_finalize(&self) -> bool {
        self.state() == AggregateState::ReadyToFinalize
            && self
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub(crate) fn finish(&self, summary: Option<String>) {
        if let Some(summary) = summary {
            let _ = self.summary.set(summary);
        }
        self.state
            .store(AggregateState::Finalized as u8, Ordering::Release);
    }
}

/// Flattened unit list plus the aggregates and source text it was built from
#[derive(Debug)]
pub struct UnitGraph {
    source: SourceText,
    units: Vec<Unit>,
    aggregates: Vec<Aggregate>,
}

impl UnitGraph {
    pub(crate) fn new(source: SourceText, units: Vec<Unit>, aggregates: Vec<Aggregate>) -> Self {
        Self {
            source,
            units,
            aggregates,
        }
    }

    pub fn source(&self) -> &SourceText {
        &self.source
    }

    /// Units in emission order; `units()[i].id == UnitId(i + 1)`
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id.index()).filter(|unit| unit.id == id)
    }

    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggregates
    }

    pub fn aggregate(&self, key: AggregateKey) -> Option<&Aggregate> {
        self.aggregates.get(key.index()).filter(|agg| agg.key == key)
    }

    pub fn analyzable_count(&self) -> usize {
        self.units.iter().filter(|unit| unit.analyzable).count()
    }

    /// Units owned directly by an aggregate; nested aggregates keep their own
    pub fn owned_units(&self, key: AggregateKey) -> impl Iterator<Item = &Unit> + '_ {
        self.units
            .iter()
            .filter(move |unit| unit.aggregate == Some(key))
    }

    /// All descendants of a unit, in no particular order
    pub fn descendants(&self, id: UnitId) -> Vec<UnitId> {
        let mut found = Vec::new();
        let mut stack: Vec<UnitId> = self
            .unit(id)
            .map(|unit| unit.children.clone())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if let Some(unit) = self.unit(next) {
                stack.extend(unit.children.iter().copied());
            }
            found.push(next);
        }
        found
    }
}
