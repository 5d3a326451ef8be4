use std::time::Duration;

use common::{error::AppError, utils::config::AppConfig};

/// Tunable parameters for query-time retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks returned per query.
    pub top_k: usize,
    pub request_timeout: Duration,
    /// Distinct queries kept in the cache; 0 disables caching.
    pub cache_capacity: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            request_timeout: Duration::from_secs(30),
            cache_capacity: 256,
        }
    }
}

impl RetrievalConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, AppError> {
        let retrieval_config = Self {
            top_k: config.retrieval_top_k,
            request_timeout: Duration::from_secs(config.service_timeout_secs),
            cache_capacity: config.query_cache_capacity,
        };
        retrieval_config.validate()?;
        Ok(retrieval_config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.top_k == 0 {
            return Err(AppError::Config("retrieval_top_k must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(AppError::Config(
                "service timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
