use super::{Pipeline, PipelineContext, PipelineInput, PipelineReport};
use crate::error::PipelineError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Result for one file, in input order
#[derive(Debug)]
pub struct FileOutcome {
    pub file: String,
    pub result: Result<PipelineReport, PipelineError>,
}

/// Runs independent pipelines for many files under an outer concurrency limit
pub struct PipelineRunner {
    context: PipelineContext,
    file_slots: Arc<Semaphore>,
}

impl PipelineRunner {
    pub fn new(context: PipelineContext, file_concurrency: usize) -> Self {
        Self {
            context,
            file_slots: Arc::new(Semaphore::new(file_concurrency.max(1))),
        }
    }

    pub async fn run_all(&self, inputs: Vec<PipelineInput>) -> Vec<FileOutcome> {
        let total = inputs.len();
        let files: Vec<String> = inputs.iter().map(|input| input.file.clone()).collect();
        let mut tasks = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            let pipeline = Pipeline::new(self.context.clone());
            let slots = self.file_slots.clone();
            tasks.spawn(async move {
                let file = input.file.clone();
                let result = match slots.acquire_owned().await {
                    Ok(_permit) => {
                        // Isolated so a panic still reports against this file
                        let run = tokio::spawn(async move { pipeline.run(input).await });
                        match run.await {
                            Ok(result) => result,
                            Err(err) => {
                                warn!(file = %file, error = %err, "File pipeline panicked");
                                Err(PipelineError::TaskFailed(err.to_string()))
                            }
                        }
                    }
                    Err(_) => Err(PipelineError::Aborted),
                };
                (index, FileOutcome { file, result })
            });
        }

        let mut outcomes: Vec<Option<FileOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(err) => warn!(error = %err, "File task failed"),
            }
        }

        let outcomes: Vec<FileOutcome> = outcomes
            .into_iter()
            .zip(files)
            .map(|(outcome, file)| {
                outcome.unwrap_or_else(|| FileOutcome {
                    file,
                    result: Err(PipelineError::TaskFailed("file task did not finish".to_string())),
                })
            })
            .collect();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(files = total, failed, "Finished all files");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::pipeline::PipelineConfig;
    use crate::ports::{MockAggregationPort, MockAnalysisPort};
    use crate::progress::{ProgressEvent, ProgressHandler};
    use crate::tree::{NestedNode, SourceText, SyntaxTree};
    use crate::unit::UnitId;

    fn input(file: &str) -> PipelineInput {
        let tree = SyntaxTree::from_nested(
            NestedNode::new("PROCEDURE", 1, 2)
                .with_children(vec![NestedNode::new("UPDATE", 2, 2)]),
        );
        PipelineInput::new(file, tree, SourceText::new("PROCEDURE p IS\nUPDATE t SET a = 1;"))
    }

    /// Blows up when the named file starts
    struct PanicOnStart(&'static str);

    impl ProgressHandler for PanicOnStart {
        fn on_progress(&self, event: &ProgressEvent) {
            if matches!(event, ProgressEvent::RunStarted { file, .. } if file == self.0) {
                panic!("handler failure for {}", self.0);
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_file_keeps_its_slot() {
        let store = Arc::new(MemoryGraph::new());
        let context = PipelineContext::new(
            Arc::new(MockAnalysisPort::new()),
            Arc::new(MockAggregationPort::new()),
            store.clone(),
            PipelineConfig::default(),
        )
        .with_progress(Arc::new(PanicOnStart("boom.sql")));
        let runner = PipelineRunner::new(context, 2);

        let outcomes = runner
            .run_all(vec![input("a.sql"), input("boom.sql"), input("b.sql")])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[1].file, "boom.sql");
        assert!(matches!(outcomes[1].result, Err(PipelineError::TaskFailed(_))));
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[2].result.is_ok());
        assert!(store.unit_summary("boom.sql", UnitId(1)).is_none());
    }

    #[tokio::test]
    async fn test_run_all_keeps_input_order_and_isolates_files() {
        let store = Arc::new(MemoryGraph::new());
        let context = PipelineContext::new(
            Arc::new(MockAnalysisPort::new()),
            Arc::new(MockAggregationPort::new()),
            store.clone(),
            PipelineConfig::default(),
        );
        let runner = PipelineRunner::new(context, 2);

        let bad = PipelineInput::new("bad.sql", SyntaxTree::new(Vec::new(), 0), SourceText::new(""));
        let outcomes = runner
            .run_all(vec![input("a.sql"), bad, input("b.sql")])
            .await;

        let files: Vec<&str> = outcomes.iter().map(|o| o.file.as_str()).collect();
        assert_eq!(files, vec!["a.sql", "bad.sql", "b.sql"]);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(PipelineError::Collection(_))));
        assert!(outcomes[2].result.is_ok());

        // Same unit ids in two files stay separate records
        assert!(store.unit_summary("a.sql", UnitId(1)).is_some());
        assert!(store.unit_summary("b.sql", UnitId(1)).is_some());
        assert_eq!(store.unit_count(), 4);
    }
}
