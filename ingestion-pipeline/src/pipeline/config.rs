use std::time::Duration;

use common::{
    error::AppError,
    utils::config::{AppConfig, FailurePolicy},
};

use crate::{chunker::ChunkingConfig, embedder::EmbeddingBatchTuning};

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingBatchTuning,
    pub failure_policy: FailurePolicy,
    /// Re-index sources even when their fingerprint is unchanged.
    pub force_reindex: bool,
}

impl IngestionConfig {
    /// Map the flat application config onto pipeline settings, rejecting
    /// invalid chunking or batching parameters before any I/O happens.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, AppError> {
        let pipeline_config = Self {
            chunking: ChunkingConfig::new(
                config.chunk_max_size,
                config.chunk_overlap,
                config.chunk_unit,
            )?,
            embedding: EmbeddingBatchTuning {
                batch_size: config.embedding_batch_size,
                concurrency: config.embedding_concurrency,
                max_attempts: config.embedding_max_attempts,
                initial_backoff_ms: config.embedding_initial_backoff_ms,
                max_backoff_ms: config.embedding_max_backoff_ms,
                request_timeout: Duration::from_secs(config.service_timeout_secs),
            },
            failure_policy: config.failure_policy,
            force_reindex: config.force_reindex,
        };
        pipeline_config.embedding.validate()?;
        Ok(pipeline_config)
    }
}
