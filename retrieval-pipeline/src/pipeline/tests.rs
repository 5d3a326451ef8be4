use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        chunk_store::{ChunkStore, RetrievedChunk, SurrealChunkStore},
        db::SurrealDbClient,
        types::text_chunk::TextChunk,
    },
    utils::embedding::EmbeddingService,
};
use uuid::Uuid;

use super::{FailureCause, RetrievalConfig, RetrievalOrchestrator, RetrievalOutcome};

const DIM: usize = 3;

/// Maps a handful of known phrases onto fixed directions.
struct MockEmbeddings {
    calls: AtomicUsize,
    failing: AtomicBool,
    stall: Option<Duration>,
}

impl MockEmbeddings {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            stall: None,
        })
    }

    fn stalling(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            stall: Some(delay),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn direction(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    if lower.contains("drawdown") {
        vec![1.0, 0.0, 0.0]
    } else if lower.contains("annuity") {
        vec![0.0, 1.0, 0.0]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddings {
    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.stall {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::TransientService("503 from embedding API".into()));
        }
        Ok(texts.iter().map(|t| direction(t)).collect())
    }
}

struct BrokenStore;

#[async_trait]
impl ChunkStore for BrokenStore {
    fn dimension(&self) -> usize {
        DIM
    }

    async fn upsert_source(
        &self,
        _source_id: &str,
        _fingerprint: &str,
        _chunks: Vec<TextChunk>,
    ) -> Result<(), AppError> {
        Err(AppError::StoreUnavailable("connection refused".into()))
    }

    async fn source_fingerprint(&self, _source_id: &str) -> Result<Option<String>, AppError> {
        Err(AppError::StoreUnavailable("connection refused".into()))
    }

    async fn retrieve(
        &self,
        _query_embedding: &[f32],
        _k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        Err(AppError::StoreUnavailable("connection refused".into()))
    }
}

fn config(top_k: usize) -> RetrievalConfig {
    RetrievalConfig {
        top_k,
        request_timeout: Duration::from_secs(5),
        cache_capacity: 8,
    }
}

async fn seeded_store() -> Arc<SurrealChunkStore> {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("in-memory surrealdb");
    db.ensure_initialized().await.expect("schema");
    let store = SurrealChunkStore::new(Arc::new(db), DIM).expect("store");

    let texts = [
        "Flexi-access drawdown lets you take income",
        "An annuity pays a guaranteed income",
        "Your state pension forecast",
    ];
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(idx, text)| {
            TextChunk::new(
                "pensions/guide.txt".into(),
                u32::try_from(idx).expect("small index"),
                (*text).to_string(),
                direction(text),
            )
        })
        .collect();
    store
        .upsert_source("pensions/guide.txt", "fingerprint", chunks)
        .await
        .expect("seed chunks");

    Arc::new(store)
}

async fn empty_store() -> Arc<SurrealChunkStore> {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("in-memory surrealdb");
    db.ensure_initialized().await.expect("schema");
    Arc::new(SurrealChunkStore::new(Arc::new(db), DIM).expect("store"))
}

#[tokio::test]
async fn returns_nearest_chunks_best_first() {
    let orchestrator =
        RetrievalOrchestrator::new(MockEmbeddings::new(), seeded_store().await, config(2))
            .expect("orchestrator");

    let outcome = orchestrator
        .retrieve("How does drawdown work?")
        .await
        .expect("retrieval");

    let chunks = outcome.chunks().expect("done");
    assert_eq!(chunks.len(), 2);
    let best = chunks.first().expect("best chunk");
    assert!(best.chunk.text.contains("drawdown"));
    assert!((best.score - 1.0).abs() < 1e-6);
    assert!(chunks.windows(2).all(|pair| match pair {
        [a, b] => a.score >= b.score,
        _ => true,
    }));
}

#[tokio::test]
async fn empty_store_yields_empty_result() {
    let orchestrator =
        RetrievalOrchestrator::new(MockEmbeddings::new(), empty_store().await, config(5))
            .expect("orchestrator");

    let outcome = orchestrator.retrieve("annuity rates").await.expect("retrieval");
    assert!(matches!(outcome, RetrievalOutcome::Done(ref chunks) if chunks.is_empty()));
}

#[tokio::test]
async fn embedding_failure_is_reported_as_unavailable() {
    let embeddings = MockEmbeddings::new();
    embeddings.failing.store(true, Ordering::SeqCst);
    let orchestrator =
        RetrievalOrchestrator::new(embeddings.clone(), seeded_store().await, config(2))
            .expect("orchestrator");

    let outcome = orchestrator.retrieve("drawdown").await.expect("retrieval");

    match outcome {
        RetrievalOutcome::Failed { cause, detail } => {
            assert_eq!(cause, FailureCause::EmbeddingUnavailable);
            assert!(detail.contains("503"));
        }
        RetrievalOutcome::Done(_) => panic!("retrieval must fail"),
    }
    assert_eq!(embeddings.calls(), 1, "query embedding is not retried");
}

#[tokio::test]
async fn embedding_timeout_is_reported_as_unavailable() {
    let orchestrator = RetrievalOrchestrator::new(
        MockEmbeddings::stalling(Duration::from_millis(500)),
        seeded_store().await,
        RetrievalConfig {
            request_timeout: Duration::from_millis(20),
            ..config(2)
        },
    )
    .expect("orchestrator");

    let outcome = orchestrator.retrieve("drawdown").await.expect("retrieval");
    assert!(matches!(
        outcome,
        RetrievalOutcome::Failed {
            cause: FailureCause::EmbeddingUnavailable,
            ..
        }
    ));
}

#[tokio::test]
async fn store_failure_is_reported_as_unavailable() {
    let orchestrator =
        RetrievalOrchestrator::new(MockEmbeddings::new(), Arc::new(BrokenStore), config(2))
            .expect("orchestrator");

    let outcome = orchestrator.retrieve("drawdown").await.expect("retrieval");
    assert!(matches!(
        outcome,
        RetrievalOutcome::Failed {
            cause: FailureCause::StoreUnavailable,
            ..
        }
    ));
    assert_eq!(FailureCause::StoreUnavailable.to_string(), "store unavailable");
}

#[tokio::test]
async fn successful_results_are_cached_per_normalised_query() {
    let embeddings = MockEmbeddings::new();
    let orchestrator =
        RetrievalOrchestrator::new(embeddings.clone(), seeded_store().await, config(1))
            .expect("orchestrator");

    let first = orchestrator.retrieve("Drawdown?").await.expect("retrieval");
    let second = orchestrator.retrieve("  drawdown?  ").await.expect("retrieval");

    assert_eq!(embeddings.calls(), 1);
    let first_ids: Vec<String> = first
        .chunks()
        .expect("done")
        .iter()
        .map(|c| c.chunk.id.clone())
        .collect();
    let second_ids: Vec<String> = second
        .chunks()
        .expect("done")
        .iter()
        .map(|c| c.chunk.id.clone())
        .collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn reindexed_chunks_are_seen_after_clearing_the_cache() {
    let embeddings = MockEmbeddings::new();
    let store = seeded_store().await;
    let orchestrator =
        RetrievalOrchestrator::new(embeddings.clone(), store.clone(), config(1))
            .expect("orchestrator");

    let before = orchestrator.retrieve("drawdown").await.expect("retrieval");
    let best = before.chunks().and_then(|c| c.first()).expect("best chunk");
    assert!(best.chunk.text.starts_with("Flexi-access"));

    store
        .upsert_source(
            "pensions/guide.txt",
            "fingerprint-2",
            vec![TextChunk::new(
                "pensions/guide.txt".into(),
                0,
                "Drawdown rules changed this year".into(),
                direction("drawdown"),
            )],
        )
        .await
        .expect("re-index");

    let stale = orchestrator.retrieve("drawdown").await.expect("retrieval");
    let best = stale.chunks().and_then(|c| c.first()).expect("cached chunk");
    assert!(best.chunk.text.starts_with("Flexi-access"));

    orchestrator.clear_cache().await;
    let fresh = orchestrator.retrieve("drawdown").await.expect("retrieval");
    let best = fresh.chunks().and_then(|c| c.first()).expect("fresh chunk");
    assert_eq!(best.chunk.text, "Drawdown rules changed this year");
    assert_eq!(embeddings.calls(), 2);
}

#[tokio::test]
async fn failed_results_are_not_cached() {
    let embeddings = MockEmbeddings::new();
    embeddings.failing.store(true, Ordering::SeqCst);
    let orchestrator =
        RetrievalOrchestrator::new(embeddings.clone(), seeded_store().await, config(1))
            .expect("orchestrator");

    let outcome = orchestrator.retrieve("drawdown").await.expect("retrieval");
    assert!(outcome.chunks().is_none());

    embeddings.failing.store(false, Ordering::SeqCst);
    let outcome = orchestrator.retrieve("drawdown").await.expect("retrieval");
    assert_eq!(outcome.chunks().map(Vec::len), Some(1));
    assert_eq!(embeddings.calls(), 2);
}

#[tokio::test]
async fn blank_query_makes_no_calls() {
    let embeddings = MockEmbeddings::new();
    let orchestrator =
        RetrievalOrchestrator::new(embeddings.clone(), Arc::new(BrokenStore), config(1))
            .expect("orchestrator");

    let outcome = orchestrator.retrieve("   ").await.expect("retrieval");
    assert!(matches!(outcome, RetrievalOutcome::Done(ref chunks) if chunks.is_empty()));
    assert_eq!(embeddings.calls(), 0);
}

#[tokio::test]
async fn rejects_mismatched_dimensions_and_zero_k() {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("in-memory surrealdb");
    let store = Arc::new(SurrealChunkStore::new(Arc::new(db), DIM + 1).expect("store"));

    assert!(matches!(
        RetrievalOrchestrator::new(MockEmbeddings::new(), store, config(1)),
        Err(AppError::Config(_))
    ));
    assert!(matches!(
        RetrievalOrchestrator::new(MockEmbeddings::new(), Arc::new(BrokenStore), config(0)),
        Err(AppError::Config(_))
    ));
}
