//! Graph mutations and the in-memory store
//!
//! Every record is keyed by its natural key (file plus unit id, aggregate key,
//! or data entity name), so applying the same [`MutationSet`] twice leaves
//! the store unchanged.

mod memory;

pub use memory::{GraphSnapshot, MemoryGraph};

use crate::ports::DataAccess;
use crate::unit::{AggregateKey, LineRange, UnitId, UnitKind};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    pub file: String,
    pub unit_id: UnitId,
    pub kind: UnitKind,
    pub range: LineRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEntityRecord {
    pub file: String,
    pub unit_id: UnitId,
    pub name: String,
    pub access: DataAccess,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub file: String,
    pub key: AggregateKey,
    pub kind: UnitKind,
    pub name: String,
    pub range: LineRange,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    UpsertUnit(UnitRecord),
    UpsertDataEntity(DataEntityRecord),
    UpsertAggregate(AggregateRecord),
}

impl Mutation {
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            Mutation::UpsertUnit(record) => Some(record.unit_id),
            Mutation::UpsertDataEntity(record) => Some(record.unit_id),
            Mutation::UpsertAggregate(_) => None,
        }
    }
}

/// Writes that must land together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationSet {
    mutations: Vec<Mutation>,
}

impl MutationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl FromIterator<Mutation> for MutationSet {
    fn from_iter<I: IntoIterator<Item = Mutation>>(iter: I) -> Self {
        Self {
            mutations: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_serializes_with_op_tag() {
        let mutation = Mutation::UpsertAggregate(AggregateRecord {
            file: "pkg.sql".to_string(),
            key: AggregateKey(1),
            kind: UnitKind::Procedure,
            name: "p".to_string(),
            range: LineRange::new(1, 9).unwrap(),
            summary: "does things".to_string(),
        });

        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["op"], "upsert_aggregate");
        assert_eq!(json["key"], 1);
        assert_eq!(json["kind"], "procedure");
        assert!(mutation.unit_id().is_none());
    }
}
