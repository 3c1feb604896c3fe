//! Configuration management for unitgraph
//!
//! Settings are loaded from environment variables with defaults, validated,
//! and turned into the per-instance [`PipelineConfig`].
//!
//! # Environment Variables
//!
//! - `UNITGRAPH_PROVIDER`: LLM provider (ollama|openai|anthropic|gemini|xai|groq) - default: "ollama"
//! - `UNITGRAPH_MODEL`: Model name - default: "qwen2.5-coder:7b"
//! - `UNITGRAPH_TOKEN_LIMIT`: Token budget per multi-unit batch - default: "1000"
//! - `UNITGRAPH_CONCURRENCY`: Concurrent analysis calls per file - default: "5"
//! - `UNITGRAPH_AGGREGATION_CONCURRENCY`: Concurrent aggregate summaries per file - default: "3"
//! - `UNITGRAPH_FILE_CONCURRENCY`: Files analyzed at once - default: "2"
//! - `UNITGRAPH_REQUEST_TIMEOUT`: Timeout per LLM call in seconds - default: "120"
//! - `UNITGRAPH_TOKENIZER`: Path to a `tokenizer.json` for exact token counts - optional
//! - `UNITGRAPH_LOG_LEVEL`: Logging level - default: "info"
//!
//! Provider credentials and endpoints are read by the genai library itself
//! (`OLLAMA_HOST`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, ...).
//! `UNITGRAPH_API_BASE_URL` overrides the endpoint for any provider.

use crate::llm::{BackendError, GenAIClient, LLMClient};
use crate::pipeline::PipelineConfig;
use crate::token::{ApproxTokenCounter, TokenCounter, TokenizerCounter, TokenizerError};
use genai::adapter::AdapterKind;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TOKEN_LIMIT: usize = 1000;
const DEFAULT_CONCURRENCY: usize = 5;
const DEFAULT_AGGREGATION_CONCURRENCY: usize = 3;
const DEFAULT_FILE_CONCURRENCY: usize = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid provider: {0}. Valid options: ollama, openai, anthropic, gemini, xai, groq")]
    InvalidProvider(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("LLM client initialization failed: {0}")]
    ClientInit(#[from] BackendError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}

#[derive(Debug, Clone)]
pub struct UnitgraphConfig {
    pub provider: AdapterKind,
    pub model: String,
    pub token_limit: usize,
    pub concurrency: usize,
    pub aggregation_concurrency: usize,
    pub file_concurrency: usize,
    pub request_timeout_secs: u64,
    pub tokenizer: Option<PathBuf>,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for UnitgraphConfig {
    fn default() -> Self {
        Self {
            provider: AdapterKind::Ollama,
            model: DEFAULT_MODEL.to_string(),
            token_limit: DEFAULT_TOKEN_LIMIT,
            concurrency: DEFAULT_CONCURRENCY,
            aggregation_concurrency: DEFAULT_AGGREGATION_CONCURRENCY,
            file_concurrency: DEFAULT_FILE_CONCURRENCY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            tokenizer: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
            field: key.to_string(),
            error: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

pub fn parse_provider(raw: &str) -> Result<AdapterKind, ConfigError> {
    AdapterKind::from_lower_str(&raw.trim().to_lowercase())
        .ok_or_else(|| ConfigError::InvalidProvider(raw.to_string()))
}

impl UnitgraphConfig {
    /// Reads `UNITGRAPH_*` variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let provider = match env::var("UNITGRAPH_PROVIDER") {
            Ok(raw) => parse_provider(&raw)?,
            Err(_) => defaults.provider,
        };

        Ok(Self {
            provider,
            model: env::var("UNITGRAPH_MODEL").unwrap_or(defaults.model),
            token_limit: env_number("UNITGRAPH_TOKEN_LIMIT", defaults.token_limit)?,
            concurrency: env_number("UNITGRAPH_CONCURRENCY", defaults.concurrency)?,
            aggregation_concurrency: env_number(
                "UNITGRAPH_AGGREGATION_CONCURRENCY",
                defaults.aggregation_concurrency,
            )?,
            file_concurrency: env_number("UNITGRAPH_FILE_CONCURRENCY", defaults.file_concurrency)?,
            request_timeout_secs: env_number(
                "UNITGRAPH_REQUEST_TIMEOUT",
                defaults.request_timeout_secs,
            )?,
            tokenizer: env::var("UNITGRAPH_TOKENIZER").ok().map(PathBuf::from),
            log_level: env::var("UNITGRAPH_LOG_LEVEL")
                .unwrap_or(defaults.log_level)
                .to_lowercase(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "Token limit must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("Concurrency", self.concurrency),
            ("Aggregation concurrency", self.aggregation_concurrency),
            ("File concurrency", self.file_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }
        if self.request_timeout_secs > 3600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout cannot exceed 1 hour".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Model name must not be empty".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_token_limit(self.token_limit)
            .with_concurrency(self.concurrency)
            .with_aggregation_concurrency(self.aggregation_concurrency)
            .with_analysis_timeout(self.request_timeout())
    }

    /// Creates the genai client for the configured provider and model.
    /// The client times out slightly after the pipeline does, so pipeline
    /// timeouts are the ones reported.
    pub fn create_llm_client(&self) -> Result<Arc<dyn LLMClient>, ConfigError> {
        let client = GenAIClient::new(
            self.provider,
            self.model.clone(),
            self.request_timeout() + Duration::from_secs(5),
        )?;
        Ok(Arc::new(client))
    }

    pub fn token_counter(&self) -> Result<Arc<dyn TokenCounter>, ConfigError> {
        Ok(match &self.tokenizer {
            Some(path) => Arc::new(TokenizerCounter::from_file(path)?),
            None => Arc::new(ApproxTokenCounter::default()),
        })
    }
}

impl fmt::Display for UnitgraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Unitgraph Configuration:")?;
        writeln!(f, "  Provider: {}", self.provider.as_str())?;
        writeln!(f, "  Model: {}", self.model)?;
        writeln!(f, "  Token Limit: {}", self.token_limit)?;
        writeln!(
            f,
            "  Concurrency: {} analysis, {} aggregation, {} files",
            self.concurrency, self.aggregation_concurrency, self.file_concurrency
        )?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        if let Some(path) = &self.tokenizer {
            writeln!(f, "  Tokenizer: {}", path.display())?;
        }
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
