use std::time::Duration;

/// Tunables for one pipeline instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upper bound on the summed token weight of a multi-unit batch
    pub token_limit: usize,
    /// Concurrent analysis calls
    pub concurrency: usize,
    /// Concurrent aggregate summarizations
    pub aggregation_concurrency: usize,
    pub analysis_timeout: Duration,
    /// Pause before the single retry of a failed graph write
    pub graph_retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_limit: 1000,
            concurrency: 5,
            aggregation_concurrency: 3,
            analysis_timeout: Duration::from_secs(120),
            graph_retry_backoff: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_limit(mut self, token_limit: usize) -> Self {
        self.token_limit = token_limit;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_aggregation_concurrency(mut self, concurrency: usize) -> Self {
        self.aggregation_concurrency = concurrency.max(1);
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn with_graph_retry_backoff(mut self, backoff: Duration) -> Self {
        self.graph_retry_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.token_limit, 1000);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.aggregation_concurrency, 3);
        assert_eq!(config.analysis_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_builder_pattern() {
        let config = PipelineConfig::new()
            .with_token_limit(100)
            .with_concurrency(0)
            .with_aggregation_concurrency(2)
            .with_analysis_timeout(Duration::from_secs(5))
            .with_graph_retry_backoff(Duration::ZERO);

        assert_eq!(config.token_limit, 100);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.aggregation_concurrency, 2);
        assert_eq!(config.analysis_timeout, Duration::from_secs(5));
        assert_eq!(config.graph_retry_backoff, Duration::ZERO);
    }
}
