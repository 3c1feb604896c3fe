//! Pipeline context for managing dependencies

use std::sync::Arc;

use crate::ports::{AggregationPort, AnalysisPort, GraphPort};
use crate::progress::{NoOpHandler, ProgressHandler};
use crate::token::{ApproxTokenCounter, TokenCounter};

use super::config::PipelineConfig;

/// Long-lived dependencies shared by every pipeline instance built from it
#[derive(Clone)]
pub struct PipelineContext {
    pub analysis: Arc<dyn AnalysisPort>,
    pub aggregation: Arc<dyn AggregationPort>,
    pub graph: Arc<dyn GraphPort>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub progress: Arc<dyn ProgressHandler>,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        analysis: Arc<dyn AnalysisPort>,
        aggregation: Arc<dyn AggregationPort>,
        graph: Arc<dyn GraphPort>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            analysis,
            aggregation,
            graph,
            token_counter: Arc::new(ApproxTokenCounter::default()),
            progress: Arc::new(NoOpHandler),
            config,
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("analysis", &self.analysis.name())
            .field("aggregation", &self.aggregation.name())
            .field("token_counter", &self.token_counter.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
