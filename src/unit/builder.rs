//! Post-order flattening of a syntax tree into units
//!
//! The traversal uses an explicit stack so generated or deeply nested trees
//! cannot overflow the call stack. A node is emitted only after all of its
//! children, which gives every unit an id greater than any descendant's.

use super::{Aggregate, AggregateKey, LineRange, Unit, UnitGraph, UnitId, UnitKind};
use crate::error::CollectionError;
use crate::token::TokenCounter;
use crate::tree::{SourceText, SyntaxTree};
use std::sync::Arc;
use tracing::debug;

enum Frame {
    Enter(usize),
    Exit(usize),
}

struct AggregateDraft {
    kind: UnitKind,
    name: String,
    range: LineRange,
    root: Option<UnitId>,
    pending: usize,
}

pub struct UnitBuilder {
    counter: Arc<dyn TokenCounter>,
}

impl UnitBuilder {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn build(
        &self,
        tree: &SyntaxTree,
        source: SourceText,
    ) -> Result<UnitGraph, CollectionError> {
        if tree.is_empty() {
            return Err(CollectionError::EmptyTree);
        }
        if tree.root >= tree.len() {
            return Err(CollectionError::RootOutOfBounds {
                root: tree.root,
                len: tree.len(),
            });
        }

        let mut entered = vec![false; tree.len()];
        let mut unit_of: Vec<Option<UnitId>> = vec![None; tree.len()];
        let mut ranges: Vec<Option<LineRange>> = vec![None; tree.len()];
        let mut units: Vec<Unit> = Vec::new();
        let mut drafts: Vec<AggregateDraft> = Vec::new();
        // Innermost open aggregate is on top
        let mut open: Vec<AggregateKey> = Vec::new();
        let mut stack = vec![Frame::Enter(tree.root)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(index) => {
                    if entered[index] {
                        return Err(CollectionError::Cycle { index });
                    }
                    entered[index] = true;

                    let node = &tree.nodes[index];
                    let range = node_range(index, &node.kind, node.start_line, node.end_line)?;
                    ranges[index] = Some(range);

                    let kind = UnitKind::parse(&node.kind);
                    if kind.behavior().aggregate_root {
                        drafts.push(AggregateDraft {
                            kind,
                            name: node
                                .name
                                .clone()
                                .unwrap_or_else(|| format!("{}@{}", kind, range.start)),
                            range,
                            root: None,
                            pending: 0,
                        });
                        open.push(AggregateKey(drafts.len() as u32));
                    }

                    stack.push(Frame::Exit(index));
                    for &child in node.children.iter().rev() {
                        if child >= tree.len() {
                            return Err(CollectionError::DanglingChild {
                                parent: index,
                                child,
                            });
                        }
                        stack.push(Frame::Enter(child));
                    }
                }
                Frame::Exit(index) => {
                    let node = &tree.nodes[index];
                    let kind = UnitKind::parse(&node.kind);
                    let behavior = kind.behavior();
                    let range = ranges[index].ok_or(CollectionError::MissingRange {
                        index,
                        kind: node.kind.clone(),
                    })?;

                    let children: Vec<UnitId> = node
                        .children
                        .iter()
                        .filter_map(|&child| unit_of[child])
                        .collect();
                    let id = UnitId(units.len() as u32 + 1);
                    let aggregate = open.last().copied();
                    let has_children = !children.is_empty();

                    let unit = Unit {
                        id,
                        range,
                        kind,
                        name: node.name.clone(),
                        token_weight: self.counter.count(&source.slice(range)),
                        has_children,
                        analyzable: behavior.analyzable,
                        is_leaf_data_unit: behavior.analyzable
                            && behavior.data_access
                            && !has_children,
                        aggregate,
                        parent: None,
                        children,
                        signal: Default::default(),
                        summary: Default::default(),
                    };

                    for child in &unit.children {
                        units[child.index()].parent = Some(id);
                    }

                    if !unit.analyzable {
                        unit.signal.fire();
                    } else if let Some(key) = aggregate {
                        drafts[key.index()].pending += 1;
                    }

                    if behavior.aggregate_root {
                        if let Some(key) = open.pop() {
                            drafts[key.index()].root = Some(id);
                        }
                    }

                    unit_of[index] = Some(id);
                    units.push(unit);
                }
            }
        }

        let aggregates: Vec<Aggregate> = drafts
            .into_iter()
            .enumerate()
            .filter_map(|(i, draft)| {
                draft.root.map(|root| {
                    Aggregate::new(
                        AggregateKey(i as u32 + 1),
                        draft.kind,
                        draft.name,
                        draft.range,
                        root,
                        draft.pending,
                    )
                })
            })
            .collect();

        debug!(
            units = units.len(),
            aggregates = aggregates.len(),
            counter = self.counter.name(),
            "Built unit graph"
        );

        Ok(UnitGraph::new(source, units, aggregates))
    }
}

fn node_range(
    index: usize,
    kind: &str,
    start: Option<u32>,
    end: Option<u32>,
) -> Result<LineRange, CollectionError> {
    let (Some(start), Some(end)) = (start, end) else {
        return Err(CollectionError::MissingRange {
            index,
            kind: kind.to_string(),
        });
    };
    LineRange::new(start, end)
        .filter(|range| range.start > 0)
        .ok_or(CollectionError::InvalidRange {
            index,
            kind: kind.to_string(),
            start,
            end,
        })
}
