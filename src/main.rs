use unitgraph::cli::commands::{CliArgs, Commands};
use unitgraph::cli::handlers::{handle_analyze, handle_plan};
use unitgraph::util::logging::{self, parse_level};
use unitgraph::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("unitgraph v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args),
        Commands::Analyze(analyze_args) => handle_analyze(analyze_args, args.quiet).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        Some(parse_level(level_str))
    } else if args.verbose {
        Some(Level::DEBUG)
    } else if args.quiet {
        Some(Level::ERROR)
    } else {
        None
    };
    logging::init_logging(logging::config_from_env(level));
}
