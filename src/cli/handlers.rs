//! Command handlers. Each returns the process exit code.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::commands::{AnalyzeArgs, PlanArgs};
use super::output::{FilePlan, OutputFormat, OutputFormatter};
use crate::batch::BatchPlanner;
use crate::config::UnitgraphConfig;
use crate::graph::MemoryGraph;
use crate::pipeline::{FileOutcome, PipelineContext, PipelineInput, PipelineRunner};
use crate::ports::{LlmAggregationPort, LlmAnalysisPort};
use crate::progress::LoggingHandler;
use crate::tree::{SourceText, SyntaxTree};
use crate::unit::UnitBuilder;

/// Source path for a tree file: the same path without its `.json` extension
pub fn source_path_for(tree: &Path) -> Result<PathBuf> {
    match tree.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(tree.with_extension("")),
        _ => bail!(
            "Tree file {} must end in .json so its source file can be located",
            tree.display()
        ),
    }
}

/// Reads a tree file and the source text next to it
pub fn load_input(tree_path: &Path) -> Result<PipelineInput> {
    let source_path = source_path_for(tree_path)?;
    let json = std::fs::read_to_string(tree_path)
        .with_context(|| format!("Failed to read tree file {}", tree_path.display()))?;
    let tree = SyntaxTree::from_json(&json)
        .with_context(|| format!("Failed to parse tree file {}", tree_path.display()))?;
    let text = std::fs::read_to_string(&source_path)
        .with_context(|| format!("Failed to read source file {}", source_path.display()))?;

    debug!(
        tree = %tree_path.display(),
        source = %source_path.display(),
        nodes = tree.len(),
        "Loaded input"
    );
    Ok(PipelineInput::new(
        source_path.display().to_string(),
        tree,
        SourceText::new(&text),
    ))
}

fn emit(output: &str) {
    if output.ends_with('\n') {
        print!("{}", output);
    } else {
        println!("{}", output);
    }
}

pub fn plan_files(args: &PlanArgs) -> Result<Vec<FilePlan>> {
    let mut config = UnitgraphConfig::from_env().context("Invalid configuration")?;
    if let Some(limit) = args.token_limit {
        config.token_limit = limit;
    }
    if let Some(path) = &args.tokenizer {
        config.tokenizer = Some(path.clone());
    }
    config.validate().context("Invalid configuration")?;

    let builder = UnitBuilder::new(config.token_counter()?);
    let planner = BatchPlanner::new(config.token_limit);

    args.trees
        .iter()
        .map(|tree_path| {
            let input = load_input(tree_path)?;
            let graph = builder
                .build(&input.tree, input.source)
                .with_context(|| format!("Failed to build units for {}", input.file))?;
            let batches = planner.plan(graph.units());
            Ok(FilePlan::new(input.file, config.token_limit, &graph, batches))
        })
        .collect()
}

pub fn handle_plan(args: &PlanArgs) -> i32 {
    let plans = match plan_files(args) {
        Ok(plans) => plans,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    match OutputFormatter::new(OutputFormat::from(args.format)).format_plans(&plans) {
        Ok(output) => {
            emit(&output);
            0
        }
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

fn analyze_config(args: &AnalyzeArgs) -> Result<UnitgraphConfig> {
    let mut config = UnitgraphConfig::from_env().context("Invalid configuration")?;
    if let Some(provider) = args.backend {
        config.provider = provider;
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(limit) = args.token_limit {
        config.token_limit = limit;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(files) = args.file_concurrency {
        config.file_concurrency = files;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(path) = &args.tokenizer {
        config.tokenizer = Some(path.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn analyze_files(args: &AnalyzeArgs) -> Result<(Vec<FileOutcome>, Arc<MemoryGraph>)> {
    let config = analyze_config(args)?;
    debug!("{}", config);

    let inputs = args
        .trees
        .iter()
        .map(|tree| load_input(tree))
        .collect::<Result<Vec<_>>>()?;

    let client = config
        .create_llm_client()
        .context("Failed to create LLM client")?;
    let store = Arc::new(MemoryGraph::new());
    let context = PipelineContext::new(
        Arc::new(LlmAnalysisPort::new(client.clone())),
        Arc::new(LlmAggregationPort::new(client)),
        store.clone(),
        config.pipeline_config(),
    )
    .with_token_counter(config.token_counter()?)
    .with_progress(Arc::new(LoggingHandler));

    info!(
        files = inputs.len(),
        provider = %config.provider.as_str(),
        model = %config.model,
        "Starting analysis"
    );
    let outcomes = PipelineRunner::new(context, config.file_concurrency)
        .run_all(inputs)
        .await;
    Ok((outcomes, store))
}

fn write_snapshot(store: &MemoryGraph, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&store.snapshot())
        .context("Failed to serialize graph snapshot")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write graph to {}", path.display()))
}

pub async fn handle_analyze(args: &AnalyzeArgs, quiet: bool) -> i32 {
    let (outcomes, store) = match analyze_files(args).await {
        Ok(result) => result,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    match OutputFormatter::new(OutputFormat::from(args.format)).format_outcomes(&outcomes) {
        Ok(output) => emit(&output),
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    }

    if let Some(path) = &args.output {
        if let Err(e) = write_snapshot(&store, path) {
            error!("{:#}", e);
            return 1;
        }
        if !quiet {
            eprintln!(
                "Graph written to {} ({} units, {} aggregates)",
                path.display(),
                store.unit_count(),
                store.aggregate_count()
            );
        }
    }

    if outcomes.iter().any(|outcome| outcome.result.is_err()) {
        1
    } else {
        0
    }
}
