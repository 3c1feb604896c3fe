//! External collaborators of the pipeline
//!
//! The scheduler never depends on how analysis is performed or how the graph
//! is stored. It talks to three ports:
//!
//! - [`AnalysisPort`]: per-unit semantic analysis of a batch, plus an optional
//!   structured-data extraction for data-access leaves
//! - [`AggregationPort`]: one holistic summary per aggregate
//! - [`GraphPort`]: idempotent upserts into a property-graph store

pub mod llm;
mod mock;

pub use llm::{LlmAggregationPort, LlmAnalysisPort};
pub use mock::{MockAggregationPort, MockAnalysisPort};

use crate::batch::{Batch, BatchId};
use crate::error::{AggregationError, AnalysisCallError, GraphApplyError};
use crate::graph::MutationSet;
use crate::unit::{Aggregate, AggregateKey, LineRange, Unit, UnitGraph, UnitId, UnitKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Code of one unit as sent for analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSnapshot {
    pub unit_id: UnitId,
    pub kind: UnitKind,
    pub range: LineRange,
    pub leaf_data: bool,
    /// Line-numbered source; committed child ranges collapse to `start~end: summary`
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub batch_id: BatchId,
    pub units: Vec<UnitSnapshot>,
}

impl BatchPayload {
    /// Snapshots every unit of the batch. Children must already be committed
    /// for their summaries to be substituted.
    pub fn build(graph: &UnitGraph, batch: &Batch) -> Self {
        let units = batch
            .units
            .iter()
            .filter_map(|id| graph.unit(*id))
            .map(|unit| UnitSnapshot {
                unit_id: unit.id,
                kind: unit.kind,
                range: unit.range,
                leaf_data: unit.is_leaf_data_unit,
                code: snapshot_code(graph, unit),
            })
            .collect();
        Self {
            batch_id: batch.id,
            units,
        }
    }

    pub fn has_leaf_data(&self) -> bool {
        self.units.iter().any(|unit| unit.leaf_data)
    }

    pub fn leaf_data_units(&self) -> impl Iterator<Item = &UnitSnapshot> {
        self.units.iter().filter(|unit| unit.leaf_data)
    }

    /// All unit snapshots concatenated under per-unit headers
    pub fn code(&self) -> String {
        render_units(self.units.iter())
    }

    /// Only the data-access leaves, for structured extraction
    pub fn leaf_data_code(&self) -> String {
        render_units(self.leaf_data_units())
    }
}

fn render_units<'a>(units: impl Iterator<Item = &'a UnitSnapshot>) -> String {
    units
        .map(|unit| {
            format!(
                "-- unit {} ({}, lines {})\n{}",
                unit.unit_id.0, unit.kind, unit.range, unit.code
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn snapshot_code(graph: &UnitGraph, unit: &Unit) -> String {
    let source = graph.source();
    let mut children: Vec<&Unit> = unit
        .children
        .iter()
        .filter_map(|id| graph.unit(*id))
        .filter(|child| child.summary().is_some())
        .collect();
    children.sort_by_key(|child| child.range.start);

    let mut lines = Vec::new();
    let mut next = unit.range.start;
    let mut push_through = |lines: &mut Vec<String>, next: &mut u32, until: u32| {
        while *next <= until {
            if let Some(text) = source.line(*next) {
                lines.push(format!("{}: {}", next, text));
            }
            *next += 1;
        }
    };

    for child in children {
        if child.range.start < next || child.range.end > unit.range.end {
            continue;
        }
        push_through(&mut lines, &mut next, child.range.start.saturating_sub(1));
        lines.push(format!(
            "{}: {}",
            child.range,
            child.summary().unwrap_or_default()
        ));
        next = child.range.end + 1;
    }
    push_through(&mut lines, &mut next, unit.range.end);

    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitAnalysis {
    pub unit_id: UnitId,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAccess {
    Read,
    Write,
}

/// A table (or other data entity) touched by a data-access unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEntity {
    pub unit_id: UnitId,
    pub name: String,
    pub access: DataAccess,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredData {
    #[serde(default)]
    pub entities: Vec<DataEntity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResult {
    pub units: Vec<UnitAnalysis>,
    pub data: Option<StructuredData>,
}

#[async_trait]
pub trait AnalysisPort: Send + Sync {
    async fn analyze_units(
        &self,
        payload: &BatchPayload,
    ) -> Result<Vec<UnitAnalysis>, AnalysisCallError>;

    async fn extract_data(
        &self,
        payload: &BatchPayload,
    ) -> Result<Option<StructuredData>, AnalysisCallError>;

    /// Runs per-unit analysis and, when the batch has data-access leaves,
    /// structured extraction concurrently. Either failure fails the batch.
    async fn analyze(&self, payload: &BatchPayload) -> Result<AnalysisResult, AnalysisCallError> {
        if payload.has_leaf_data() {
            let (units, data) =
                tokio::try_join!(self.analyze_units(payload), self.extract_data(payload))?;
            Ok(AnalysisResult { units, data })
        } else {
            Ok(AnalysisResult {
                units: self.analyze_units(payload).await?,
                data: None,
            })
        }
    }

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSummaryEntry {
    pub unit_id: UnitId,
    pub kind: UnitKind,
    pub range: LineRange,
    pub summary: String,
}

/// Everything an aggregation call sees: the aggregate and its applied unit summaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    pub key: AggregateKey,
    pub kind: UnitKind,
    pub name: String,
    pub range: LineRange,
    pub units: BTreeMap<UnitId, UnitSummaryEntry>,
}

impl AggregationRequest {
    /// Collects summaries of every unit in the aggregate's subtree, nested
    /// aggregates included. Units without a committed summary, or with an
    /// empty one from a degraded batch, are left out.
    pub fn collect(graph: &UnitGraph, aggregate: &Aggregate) -> Self {
        let mut subtree = graph.descendants(aggregate.root);
        subtree.push(aggregate.root);
        let units = subtree
            .into_iter()
            .filter_map(|id| graph.unit(id))
            .filter_map(|unit| {
                let summary = unit.summary().filter(|s| !s.is_empty())?;
                Some((
                    unit.id,
                    UnitSummaryEntry {
                        unit_id: unit.id,
                        kind: unit.kind,
                        range: unit.range,
                        summary: summary.to_string(),
                    },
                ))
            })
            .collect();
        Self {
            key: aggregate.key,
            kind: aggregate.kind,
            name: aggregate.name.clone(),
            range: aggregate.range,
            units,
        }
    }
}

#[async_trait]
pub trait AggregationPort: Send + Sync {
    async fn summarize(&self, request: &AggregationRequest) -> Result<String, AggregationError>;

    fn name(&self) -> &str;
}

/// Graph store writes. Implementations must upsert so that a retried
/// mutation set never duplicates entities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphPort: Send + Sync {
    async fn apply_mutations(&self, mutations: &MutationSet) -> Result<(), GraphApplyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchPlanner;
    use crate::token::WordTokenCounter;
    use crate::tree::{NestedNode, SourceText, SyntaxTree};
    use crate::unit::UnitBuilder;
    use std::sync::Arc;

    fn graph() -> UnitGraph {
        let tree = SyntaxTree::from_nested(
            NestedNode::new("PROCEDURE", 1, 6).with_children(vec![
                NestedNode::new("DECLARE", 2, 2),
                NestedNode::new("IF", 3, 5).with_children(vec![
                    NestedNode::new("UPDATE", 4, 4),
                ]),
                NestedNode::new("RETURN", 6, 6),
            ]),
        );
        let source = SourceText::new(
            "PROCEDURE p IS\n\
             x NUMBER;\n\
             IF x > 0 THEN\n\
             UPDATE t SET a = 1;\n\
             END IF;\n\
             RETURN;",
        );
        UnitBuilder::new(Arc::new(WordTokenCounter))
            .build(&tree, source)
            .unwrap()
    }

    #[test]
    fn test_leaf_snapshot_is_line_numbered() {
        let graph = graph();
        let batches = BatchPlanner::new(100).plan(graph.units());
        let payload = BatchPayload::build(&graph, &batches[0]);

        assert_eq!(payload.units.len(), 1);
        assert_eq!(payload.units[0].code, "4: UPDATE t SET a = 1;");
        assert!(payload.has_leaf_data());
        assert!(payload.code().starts_with("-- unit 2 (UPDATE, lines 4~4)"));
    }

    #[test]
    fn test_parent_snapshot_substitutes_committed_children() {
        let graph = graph();
        graph
            .unit(UnitId(2))
            .unwrap()
            .set_summary("sets a to 1 in t".to_string());

        let if_batch = Batch {
            id: BatchId(2),
            units: vec![UnitId(3)],
        };
        let payload = BatchPayload::build(&graph, &if_batch);
        assert_eq!(
            payload.units[0].code,
            "3: IF x > 0 THEN\n4~4: sets a to 1 in t\n5: END IF;"
        );
        assert!(!payload.has_leaf_data());
    }

    #[test]
    fn test_uncommitted_children_keep_source_lines() {
        let graph = graph();
        let proc_batch = Batch {
            id: BatchId(4),
            units: vec![UnitId(5)],
        };
        let payload = BatchPayload::build(&graph, &proc_batch);
        // DECLARE is never summarized, so its line stays verbatim
        assert!(payload.units[0].code.contains("2: x NUMBER;"));
        assert!(payload.units[0].code.contains("4: UPDATE t SET a = 1;"));
    }

    #[test]
    fn test_aggregation_request_skips_empty_summaries() {
        let graph = graph();
        graph.unit(UnitId(2)).unwrap().set_summary("update".to_string());
        graph.unit(UnitId(3)).unwrap().set_summary(String::new());

        let request = AggregationRequest::collect(&graph, &graph.aggregates()[0]);
        assert_eq!(request.units.len(), 1);
        assert_eq!(request.units[&UnitId(2)].summary, "update");
        assert_eq!(request.units[&UnitId(2)].kind, UnitKind::Update);
    }

    #[test]
    fn test_aggregation_request_spans_nested_aggregates() {
        let tree = SyntaxTree::from_nested(
            NestedNode::new("PACKAGE", 1, 3)
                .with_name("pkg")
                .with_children(vec![NestedNode::new("PROCEDURE", 2, 3)
                    .with_name("a")
                    .with_children(vec![NestedNode::new("UPDATE", 3, 3)])]),
        );
        let graph = UnitBuilder::new(Arc::new(WordTokenCounter))
            .build(&tree, SourceText::new("PACKAGE pkg IS\nPROCEDURE a IS\nUPDATE t SET a = 1;"))
            .unwrap();
        for unit in graph.units() {
            unit.set_summary(format!("{} summary", unit.kind));
        }

        let package = graph.aggregates().iter().find(|a| a.name == "pkg").unwrap();
        let request = AggregationRequest::collect(&graph, package);
        let ids: Vec<UnitId> = request.units.keys().copied().collect();
        assert_eq!(ids, vec![UnitId(1), UnitId(2), UnitId(3)]);

        let procedure = graph.aggregates().iter().find(|a| a.name == "a").unwrap();
        let request = AggregationRequest::collect(&graph, procedure);
        assert_eq!(request.units.len(), 2);
        assert!(!request.units.contains_key(&UnitId(3)));
    }

    struct EchoPort;

    #[async_trait]
    impl AnalysisPort for EchoPort {
        async fn analyze_units(
            &self,
            payload: &BatchPayload,
        ) -> Result<Vec<UnitAnalysis>, AnalysisCallError> {
            Ok(payload
                .units
                .iter()
                .map(|u| UnitAnalysis {
                    unit_id: u.unit_id,
                    summary: u.kind.to_string(),
                })
                .collect())
        }

        async fn extract_data(
            &self,
            _payload: &BatchPayload,
        ) -> Result<Option<StructuredData>, AnalysisCallError> {
            Err(AnalysisCallError::Other("extraction down".to_string()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_analyze_joins_extraction_for_leaf_data() {
        let graph = graph();
        let batches = BatchPlanner::new(100).plan(graph.units());

        // UPDATE batch has leaf data, so the failing extraction fails the call
        let leaf = BatchPayload::build(&graph, &batches[0]);
        assert!(EchoPort.analyze(&leaf).await.is_err());

        // IF batch has none, so extraction is never issued
        let parent = BatchPayload::build(&graph, &batches[1]);
        let result = EchoPort.analyze(&parent).await.unwrap();
        assert_eq!(result.units[0].summary, "IF");
        assert!(result.data.is_none());
    }
}
