use common::error::AppError;
use tracing::error;

use super::config::IngestionConfig;

/// Working state for indexing a single source document.
pub struct PipelineContext<'a> {
    pub source_id: &'a str,
    pub text: &'a str,
    pub fingerprint: String,
    pub pipeline_config: &'a IngestionConfig,
    pub chunks: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        source_id: &'a str,
        text: &'a str,
        fingerprint: String,
        pipeline_config: &'a IngestionConfig,
    ) -> Self {
        Self {
            source_id,
            text,
            fingerprint,
            pipeline_config,
            chunks: Vec::new(),
            embeddings: Vec::new(),
        }
    }

    pub fn take_chunks(&mut self) -> Vec<String> {
        std::mem::take(&mut self.chunks)
    }

    pub fn take_embeddings(&mut self) -> Vec<Vec<f32>> {
        std::mem::take(&mut self.embeddings)
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            source_id = %self.source_id,
            chunk_count = self.chunks.len(),
            error = %err,
            "indexing pipeline aborted"
        );
        err
    }
}
