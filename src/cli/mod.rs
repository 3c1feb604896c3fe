pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{AnalyzeArgs, CliArgs, Commands, OutputFormatArg, PlanArgs};
pub use handlers::{handle_analyze, handle_plan};
pub use output::{FilePlan, OutputFormat, OutputFormatter};
