//! Structured logging setup
//!
//! Initializes a `tracing` subscriber with an `EnvFilter`, either pretty
//! console output or JSON lines. Initialization happens at most once per
//! process; later calls are ignored.
//!
//! ```no_run
//! use unitgraph::util::logging;
//!
//! // UNITGRAPH_LOG_LEVEL=debug UNITGRAPH_LOG_JSON=true
//! logging::init_from_env();
//!
//! tracing::info!(file = "pkg_orders.sql", batches = 4, "Planned analysis");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose debug output drowns out the pipeline's own events
const NOISY_TARGETS: &[&str] = &["h2=warn", "hyper=warn", "hyper_util=warn", "reqwest=warn"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for `unitgraph` targets
    pub level: Level,

    /// JSON lines instead of human-readable output
    pub use_json: bool,

    pub include_target: bool,

    /// File and line of each event
    pub include_location: bool,

    pub include_thread_ids: bool,

    /// Write to stderr so stdout stays clean for command output
    pub to_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
            to_stderr: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with source locations and thread ids, for log shippers
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
            to_stderr: true,
        }
    }

    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            ..Default::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env();
        if let Ok(directive) = format!("unitgraph={}", self.level).parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
        if env::var("RUST_LOG").is_err() {
            for target in NOISY_TARGETS {
                if let Ok(directive) = target.parse::<Directive>() {
                    filter = filter.add_directive(directive);
                }
            }
        }
        filter
    }
}

/// Parses a level name, case-insensitive. Unknown names fall back to INFO.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = config.filter();
        let layer = fmt::layer()
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        match (config.use_json, config.to_stderr) {
            (true, true) => tracing_subscriber::registry()
                .with(filter)
                .with(layer.json().with_writer(std::io::stderr))
                .init(),
            (true, false) => tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init(),
            (false, true) => tracing_subscriber::registry()
                .with(filter)
                .with(layer.with_writer(std::io::stderr))
                .init(),
            (false, false) => tracing_subscriber::registry().with(filter).with(layer).init(),
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Reads `UNITGRAPH_LOG_LEVEL` and `UNITGRAPH_LOG_JSON`; `RUST_LOG` still applies on top
pub fn init_from_env() {
    init_logging(config_from_env(None));
}

/// Builds a configuration from the environment, letting an explicit level win
pub fn config_from_env(level_override: Option<Level>) -> LoggingConfig {
    let level = level_override.unwrap_or_else(|| {
        env::var("UNITGRAPH_LOG_LEVEL")
            .map(|raw| parse_level(&raw))
            .unwrap_or(Level::INFO)
    });
    let use_json = env::var("UNITGRAPH_LOG_JSON")
        .ok()
        .and_then(|v| v.trim().parse::<bool>().ok())
        .unwrap_or(false);

    LoggingConfig {
        level,
        use_json,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level(" INFO "), Level::INFO);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_invalid() {
        assert_eq!(parse_level("loud"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_presets() {
        let default = LoggingConfig::default();
        assert_eq!(default.level, Level::INFO);
        assert!(!default.use_json);
        assert!(default.to_stderr);

        let production = LoggingConfig::production();
        assert!(production.use_json);
        assert!(production.include_location);
        assert!(production.include_thread_ids);

        let development = LoggingConfig::development();
        assert_eq!(development.level, Level::DEBUG);
        assert!(!development.use_json);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("UNITGRAPH_LOG_LEVEL", "debug");
        env::set_var("UNITGRAPH_LOG_JSON", "true");

        let config = config_from_env(None);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);

        let overridden = config_from_env(Some(Level::ERROR));
        assert_eq!(overridden.level, Level::ERROR);

        env::remove_var("UNITGRAPH_LOG_LEVEL");
        env::remove_var("UNITGRAPH_LOG_JSON");

        let config = config_from_env(None);
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
    }
}
