mod cache;
mod config;
mod state;

pub use cache::QueryCache;
pub use config::RetrievalConfig;

use std::{fmt, sync::Arc, time::Instant};

use common::{
    error::AppError,
    storage::chunk_store::ChunkStore,
    utils::embedding::EmbeddingService,
};
use state_machines::core::GuardError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::RetrievalResult;

use self::state::embedding_query;

/// Why a retrieval could not produce grounding context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    EmbeddingUnavailable,
    StoreUnavailable,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCause::EmbeddingUnavailable => "embedding unavailable",
            FailureCause::StoreUnavailable => "store unavailable",
        };
        f.write_str(label)
    }
}

/// Terminal state of one retrieval.
#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    /// Nearest chunks, best first. May be empty.
    Done(RetrievalResult),
    /// The answer cannot be grounded; callers fall back to an ungrounded response.
    Failed { cause: FailureCause, detail: String },
}

impl RetrievalOutcome {
    pub fn chunks(&self) -> Option<&RetrievalResult> {
        match self {
            RetrievalOutcome::Done(chunks) => Some(chunks),
            RetrievalOutcome::Failed { .. } => None,
        }
    }
}

/// Embeds a query and searches the chunk store for its nearest neighbours.
pub struct RetrievalOrchestrator {
    embedding: Arc<dyn EmbeddingService>,
    store: Arc<dyn ChunkStore>,
    config: RetrievalConfig,
    cache: Mutex<QueryCache>,
}

impl RetrievalOrchestrator {
    pub fn new(
        embedding: Arc<dyn EmbeddingService>,
        store: Arc<dyn ChunkStore>,
        config: RetrievalConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        if embedding.dimension() != store.dimension() {
            return Err(AppError::Config(format!(
                "embedding service produces dimension {}, the store holds dimension {}",
                embedding.dimension(),
                store.dimension()
            )));
        }

        let cache = Mutex::new(QueryCache::new(config.cache_capacity));
        Ok(Self {
            embedding,
            store,
            config,
            cache,
        })
    }

    /// Forget cached results, e.g. after the store has been re-indexed.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
        debug!("retrieval cache cleared");
    }

    /// Run `EmbeddingQuery -> Searching -> Done`, or stop in `Failed`.
    ///
    /// Service failures are reported as [`RetrievalOutcome::Failed`]; an `Err`
    /// means the state machine itself was driven incorrectly.
    #[tracing::instrument(skip_all, fields(query_chars = query.chars().count()))]
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalOutcome, AppError> {
        if query.trim().is_empty() {
            return Ok(RetrievalOutcome::Done(Vec::new()));
        }

        if let Some(cached) = self.cache.lock().await.get(query) {
            debug!(result_count = cached.len(), "retrieval served from cache");
            return Ok(RetrievalOutcome::Done(cached));
        }

        let started = Instant::now();
        let machine = embedding_query();

        let embedding = match self.embed_query(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                let _failed = machine
                    .fail()
                    .map_err(|(_, guard)| map_guard_error("fail", &guard))?;
                warn!(error = %err, "query embedding failed; answer cannot be grounded");
                return Ok(RetrievalOutcome::Failed {
                    cause: FailureCause::EmbeddingUnavailable,
                    detail: err.to_string(),
                });
            }
        };
        let machine = machine
            .search()
            .map_err(|(_, guard)| map_guard_error("search", &guard))?;

        let chunks = match self.search(&embedding).await {
            Ok(chunks) => chunks,
            Err(err) => {
                let _failed = machine
                    .fail()
                    .map_err(|(_, guard)| map_guard_error("fail", &guard))?;
                warn!(error = %err, "chunk search failed; answer cannot be grounded");
                return Ok(RetrievalOutcome::Failed {
                    cause: FailureCause::StoreUnavailable,
                    detail: err.to_string(),
                });
            }
        };
        let _done = machine
            .complete()
            .map_err(|(_, guard)| map_guard_error("complete", &guard))?;

        info!(
            result_count = chunks.len(),
            top_score = chunks.first().map(|c| c.score),
            total_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "retrieval finished"
        );

        self.cache.lock().await.insert(query, chunks.clone());
        Ok(RetrievalOutcome::Done(chunks))
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AppError> {
        let timeout = self.config.request_timeout;
        let vectors = tokio::time::timeout(timeout, self.embedding.embed(vec![query.to_string()]))
            .await
            .map_err(|_| {
                AppError::TransientService(format!(
                    "query embedding timed out after {}ms",
                    timeout.as_millis()
                ))
            })??;

        let mut vectors = vectors.into_iter();
        match (vectors.next(), vectors.next()) {
            (Some(vector), None) if vector.len() == self.embedding.dimension() => Ok(vector),
            (Some(vector), None) => Err(AppError::DataIntegrity(format!(
                "query embedding has dimension {}, expected {}",
                vector.len(),
                self.embedding.dimension()
            ))),
            _ => Err(AppError::DataIntegrity(
                "expected exactly one query embedding".into(),
            )),
        }
    }

    async fn search(&self, embedding: &[f32]) -> Result<RetrievalResult, AppError> {
        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, self.store.retrieve(embedding, self.config.top_k))
            .await
            .map_err(|_| {
                AppError::StoreUnavailable(format!(
                    "chunk search timed out after {}ms",
                    timeout.as_millis()
                ))
            })?
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid retrieval transition during {event}: {guard:?}"
    ))
}

#[cfg(test)]
mod tests;
