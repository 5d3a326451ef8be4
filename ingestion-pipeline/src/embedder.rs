use std::{sync::Arc, time::Duration};

use common::{error::AppError, utils::embedding::EmbeddingService};
use futures::{stream, StreamExt, TryStreamExt};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct EmbeddingBatchTuning {
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    /// Total attempts per batch, including the first.
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout: Duration,
}

impl Default for EmbeddingBatchTuning {
    fn default() -> Self {
        Self {
            batch_size: 20,
            concurrency: 2,
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EmbeddingBatchTuning {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::Config("embedding batch size must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(AppError::Config(
                "embedding concurrency must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config(
                "embedding max attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.initial_backoff_ms.div_ceil(2).max(1))
            .max_delay(Duration::from_millis(self.max_backoff_ms))
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Embeds ordered texts in fixed-size batches against an [`EmbeddingService`].
pub struct BatchEmbedder {
    service: Arc<dyn EmbeddingService>,
    tuning: EmbeddingBatchTuning,
}

impl BatchEmbedder {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        tuning: EmbeddingBatchTuning,
    ) -> Result<Self, AppError> {
        tuning.validate()?;
        Ok(Self { service, tuning })
    }

    pub fn dimension(&self) -> usize {
        self.service.dimension()
    }

    /// One vector per input text, in input order.
    ///
    /// Batches run concurrently up to the configured limit; any batch that
    /// exhausts its retries or returns malformed vectors fails the whole call.
    #[instrument(skip_all, fields(text_count = texts.len()))]
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<String>> = texts
            .chunks(self.tuning.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let batch_count = batches.len();

        let embedded: Vec<Vec<Vec<f32>>> = stream::iter(
            batches
                .into_iter()
                .enumerate()
                .map(|(batch_index, batch)| self.embed_batch(batch_index, batch)),
        )
        .buffered(self.tuning.concurrency)
        .try_collect()
        .await?;

        debug!(batch_count, "all embedding batches completed");

        Ok(embedded.into_iter().flatten().collect())
    }

    async fn embed_batch(
        &self,
        batch_index: usize,
        batch: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let expected = batch.len();
        let timeout = self.tuning.request_timeout;
        let mut attempt = 0usize;

        let vectors = RetryIf::spawn(
            self.tuning.backoff(),
            || {
                attempt = attempt.saturating_add(1);
                let current_attempt = attempt;
                let texts = batch.clone();
                async move {
                    let result = tokio::time::timeout(timeout, self.service.embed(texts))
                        .await
                        .map_err(|_| {
                            AppError::TransientService(format!(
                                "embedding request timed out after {}ms",
                                timeout.as_millis()
                            ))
                        })
                        .and_then(|inner| inner);
                    if let Err(err) = &result {
                        warn!(
                            batch_index,
                            attempt = current_attempt,
                            error = %err,
                            "embedding batch attempt failed"
                        );
                    }
                    result
                }
            },
            AppError::is_transient,
        )
        .await
        .map_err(|err| err.in_batch(batch_index))?;

        self.check_batch(expected, &vectors)
            .map_err(|err| err.in_batch(batch_index))?;

        debug!(batch_index, size = expected, "embedding batch completed");
        Ok(vectors)
    }

    fn check_batch(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), AppError> {
        if vectors.len() != expected {
            return Err(AppError::DataIntegrity(format!(
                "expected {expected} embeddings, service returned {}",
                vectors.len()
            )));
        }

        let dimension = self.service.dimension();
        if let Some((position, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != dimension)
        {
            return Err(AppError::DataIntegrity(format!(
                "embedding {position} has dimension {}, expected {dimension}",
                vector.len()
            )));
        }

        Ok(())
    }
}
