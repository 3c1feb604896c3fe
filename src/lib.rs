//! unitgraph - incremental semantic analysis of parsed source into a property graph
//!
//! A parsed syntax tree is flattened into post-order analysis units, grouped
//! into token-bounded batches and summarized by an LLM bottom-up: a parent is
//! only analyzed once all of its children are committed, so its prompt can
//! use their summaries in place of their code. Results are applied to the
//! graph strictly in batch order, and each procedure, function, trigger or
//! package receives one holistic summary when its last unit lands.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use unitgraph::graph::MemoryGraph;
//! use unitgraph::pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineInput};
//! use unitgraph::ports::{MockAggregationPort, MockAnalysisPort};
//! use unitgraph::tree::{SourceText, SyntaxTree};
//!
//! # async fn run(json: &str, text: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let context = PipelineContext::new(
//!     Arc::new(MockAnalysisPort::new()),
//!     Arc::new(MockAggregationPort::new()),
//!     Arc::new(MemoryGraph::new()),
//!     PipelineConfig::default().with_token_limit(500),
//! );
//! let input = PipelineInput::new("pkg_orders.sql", SyntaxTree::from_json(json)?, SourceText::new(text));
//! let report = Pipeline::new(context).run(input).await?;
//! println!("{} batches, {} degraded", report.batches, report.analysis_errors());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`tree`]: parser output (arena or nested JSON)
//! - [`unit`]: units, aggregates, completion signals and the [`UnitBuilder`]
//! - [`batch`]: the token-bounded [`BatchPlanner`]
//! - [`ports`]: analysis, aggregation and graph boundaries, with mock and LLM adapters
//! - [`pipeline`]: dispatcher, ordered applier, aggregator and the multi-file runner
//! - [`graph`]: graph mutations and the in-memory store
//! - [`llm`]: LLM clients over `genai`

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod ports;
pub mod progress;
pub mod token;
pub mod tree;
pub mod unit;
pub mod util;

pub use batch::{Batch, BatchId, BatchPlanner};
pub use config::{ConfigError, UnitgraphConfig};
pub use error::{
    AggregationError, AnalysisCallError, CollectionError, GraphApplyError, PipelineError,
};
pub use graph::{GraphSnapshot, MemoryGraph, Mutation, MutationSet};
pub use pipeline::{
    FileOutcome, Pipeline, PipelineConfig, PipelineContext, PipelineInput, PipelineReport,
    PipelineRunner,
};
pub use ports::{AggregationPort, AnalysisPort, GraphPort};
pub use progress::{ProgressEvent, ProgressHandler};
pub use tree::{SourceText, SyntaxTree};
pub use unit::{UnitBuilder, UnitGraph, UnitId};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
