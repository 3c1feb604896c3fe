use crate::config::parse_provider;
use clap::{Parser, Subcommand, ValueEnum};
use genai::adapter::AdapterKind;
use std::path::PathBuf;

/// Semantic analysis of parsed source trees into a property graph
#[derive(Parser, Debug)]
#[command(
    name = "unitgraph",
    about = "Semantic analysis of parsed source trees into a property graph",
    version,
    author,
    long_about = "unitgraph splits a parsed source file into analysis units, batches them \
                  under a token budget, summarizes them bottom-up with an LLM and applies \
                  the results to a property graph in source order."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build units and plan batches without calling any backend",
        long_about = "Builds the unit graph for each tree and prints its units and the \
                      planned batches.\n\n\
                      Examples:\n  \
                      unitgraph plan pkg_orders.sql.json\n  \
                      unitgraph plan a.sql.json b.sql.json --token-limit 500 --format json"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Analyze trees with an LLM and build the graph",
        long_about = "Runs the full pipeline for each tree against an in-memory graph store, \
                      prints one report per file and optionally writes the resulting graph.\n\n\
                      Examples:\n  \
                      unitgraph analyze pkg_orders.sql.json\n  \
                      unitgraph analyze *.json --backend openai --model gpt-4o-mini -o graph.json"
    )]
    Analyze(AnalyzeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        value_name = "TREE",
        required = true,
        help = "Syntax tree JSON files; the source is the same path without .json"
    )]
    pub trees: Vec<PathBuf>,

    #[arg(long, value_name = "TOKENS", help = "Token budget per multi-unit batch")]
    pub token_limit: Option<usize>,

    #[arg(long, value_name = "FILE", help = "tokenizer.json for exact token weights")]
    pub tokenizer: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(
        value_name = "TREE",
        required = true,
        help = "Syntax tree JSON files; the source is the same path without .json"
    )]
    pub trees: Vec<PathBuf>,

    #[arg(long, value_name = "TOKENS", help = "Token budget per multi-unit batch")]
    pub token_limit: Option<usize>,

    #[arg(long, value_name = "N", help = "Concurrent analysis calls per file")]
    pub concurrency: Option<usize>,

    #[arg(long, value_name = "N", help = "Files analyzed at once")]
    pub file_concurrency: Option<usize>,

    #[arg(
        short = 'b',
        long,
        value_parser = parse_adapter_kind,
        help = "LLM provider (ollama, openai, anthropic, gemini, xai, groq)"
    )]
    pub backend: Option<AdapterKind>,

    #[arg(
        short = 'm',
        long,
        value_name = "MODEL",
        help = "Model name (provider-specific, e.g. 'qwen2.5-coder:7b' for Ollama)"
    )]
    pub model: Option<String>,

    #[arg(long, value_name = "SECONDS", help = "Timeout per LLM call in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, value_name = "FILE", help = "tokenizer.json for exact token weights")]
    pub tokenizer: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the resulting graph as JSON"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_adapter_kind(s: &str) -> Result<AdapterKind, String> {
    parse_provider(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_plan_defaults() {
        let args = CliArgs::parse_from(["unitgraph", "plan", "a.sql.json"]);
        match args.command {
            Commands::Plan(plan) => {
                assert_eq!(plan.trees, vec![PathBuf::from("a.sql.json")]);
                assert_eq!(plan.format, OutputFormatArg::Human);
                assert!(plan.token_limit.is_none());
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_plan_requires_a_tree() {
        assert!(CliArgs::try_parse_from(["unitgraph", "plan"]).is_err());
    }

    #[test]
    fn test_analyze_with_options() {
        let args = CliArgs::parse_from([
            "unitgraph",
            "analyze",
            "a.sql.json",
            "b.sql.json",
            "--token-limit",
            "500",
            "--concurrency",
            "8",
            "--file-concurrency",
            "3",
            "--backend",
            "ollama",
            "--model",
            "qwen:14b",
            "--timeout",
            "30",
            "-o",
            "graph.json",
            "--format",
            "json",
        ]);

        match args.command {
            Commands::Analyze(analyze) => {
                assert_eq!(analyze.trees.len(), 2);
                assert_eq!(analyze.token_limit, Some(500));
                assert_eq!(analyze.concurrency, Some(8));
                assert_eq!(analyze.file_concurrency, Some(3));
                assert_eq!(analyze.backend, Some(AdapterKind::Ollama));
                assert_eq!(analyze.model.as_deref(), Some("qwen:14b"));
                assert_eq!(analyze.timeout, Some(30));
                assert_eq!(analyze.output, Some(PathBuf::from("graph.json")));
                assert_eq!(analyze.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let result = CliArgs::try_parse_from(["unitgraph", "analyze", "a.json", "-b", "nope"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["unitgraph", "-v", "plan", "a.json"]);
        assert!(args.verbose);
        assert!(!args.quiet);

        let args = CliArgs::parse_from(["unitgraph", "plan", "a.json", "--log-level", "debug"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        assert!(CliArgs::try_parse_from(["unitgraph", "-v", "-q", "plan", "a.json"]).is_err());
    }
}
