//! Shared builders for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use unitgraph::batch::BatchId;
use unitgraph::graph::MemoryGraph;
use unitgraph::pipeline::{PipelineConfig, PipelineContext, PipelineInput};
use unitgraph::ports::{AggregationPort, AnalysisPort, MockAnalysisPort};
use unitgraph::progress::{ProgressEvent, ProgressHandler};
use unitgraph::token::WordTokenCounter;
use unitgraph::tree::{NestedNode, SourceText, SyntaxTree};
use unitgraph::unit::UnitId;

pub fn words(n: usize) -> String {
    vec!["w"; n].join(" ")
}

/// `PROCEDURE p -> [SELECT (50 words), IF -> [INSERT (40 words)]]`
///
/// Under a limit of 100 this plans `[SELECT] [INSERT] [IF] [PROCEDURE]`.
pub fn procedure_input(file: &str) -> PipelineInput {
    let tree = SyntaxTree::from_nested(
        NestedNode::new("PROCEDURE", 1, 4)
            .with_name("p")
            .with_children(vec![
                NestedNode::new("SELECT", 2, 2),
                NestedNode::new("IF", 3, 4).with_children(vec![NestedNode::new("INSERT", 4, 4)]),
            ]),
    );
    let source = SourceText::new(&format!(
        "PROCEDURE p IS\n{}\nIF x THEN\n{}",
        words(50),
        words(40)
    ));
    PipelineInput::new(file, tree, source)
}

/// `FUNCTION f -> [ASSIGNMENT (60 words), ASSIGNMENT (60 words)]`
pub fn sixty_sixty_input(file: &str) -> PipelineInput {
    let tree = SyntaxTree::from_nested(
        NestedNode::new("FUNCTION", 1, 3)
            .with_name("f")
            .with_children(vec![
                NestedNode::new("ASSIGNMENT", 2, 2),
                NestedNode::new("ASSIGNMENT", 3, 3),
            ]),
    );
    let source = SourceText::new(&format!("FUNCTION f IS\n{}\n{}", words(60), words(60)));
    PipelineInput::new(file, tree, source)
}

/// `PACKAGE pkg -> [PROCEDURE a -> [UPDATE], PROCEDURE b -> [SELECT]]`
pub fn package_input(file: &str) -> PipelineInput {
    let tree = SyntaxTree::from_nested(
        NestedNode::new("PACKAGE", 1, 5)
            .with_name("pkg")
            .with_children(vec![
                NestedNode::new("PROCEDURE", 2, 3)
                    .with_name("a")
                    .with_children(vec![NestedNode::new("UPDATE", 3, 3)]),
                NestedNode::new("PROCEDURE", 4, 5)
                    .with_name("b")
                    .with_children(vec![NestedNode::new("SELECT", 5, 5)]),
            ]),
    );
    let source = SourceText::new(
        "PACKAGE BODY pkg IS\n\
         PROCEDURE a IS\n\
         UPDATE orders SET status = 'X';\n\
         PROCEDURE b IS\n\
         SELECT COUNT(*) INTO n FROM orders;",
    );
    PipelineInput::new(file, tree, source)
}

pub fn context(
    analysis: Arc<dyn AnalysisPort>,
    aggregation: Arc<dyn AggregationPort>,
    store: Arc<MemoryGraph>,
    progress: Arc<dyn ProgressHandler>,
) -> PipelineContext {
    PipelineContext::new(
        analysis,
        aggregation,
        store,
        PipelineConfig::default()
            .with_token_limit(100)
            .with_analysis_timeout(Duration::from_secs(5))
            .with_graph_retry_backoff(Duration::ZERO),
    )
    .with_token_counter(Arc::new(WordTokenCounter))
    .with_progress(progress)
}

/// Records when each unit committed and which batches the port had started by then
pub struct CommitClock {
    port: Arc<MockAnalysisPort>,
    commits: Mutex<HashMap<UnitId, (Instant, Vec<BatchId>)>>,
}

impl CommitClock {
    pub fn new(port: Arc<MockAnalysisPort>) -> Self {
        Self {
            port,
            commits: Mutex::new(HashMap::new()),
        }
    }

    pub fn committed_at(&self, unit: UnitId) -> Option<Instant> {
        self.commits.lock().unwrap().get(&unit).map(|(at, _)| *at)
    }

    /// Batches whose analysis had started when `unit` committed
    pub fn dispatched_before(&self, unit: UnitId) -> Vec<BatchId> {
        self.commits
            .lock()
            .unwrap()
            .get(&unit)
            .map(|(_, seen)| seen.clone())
            .unwrap_or_default()
    }
}

impl ProgressHandler for CommitClock {
    fn on_progress(&self, event: &ProgressEvent) {
        if let ProgressEvent::UnitApplied { unit_id, .. } = event {
            self.commits
                .lock()
                .unwrap()
                .insert(*unit_id, (Instant::now(), self.port.calls()));
        }
    }
}
