use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{source_document::SourceDocument, text_chunk::TextChunk, StoredObject},
    },
    utils::similarity::cosine_similarity,
};

const WRITE_ATTEMPTS: usize = 3;
const WRITE_INITIAL_BACKOFF_MS: u64 = 50;
const WRITE_MAX_BACKOFF_MS: u64 = 800;

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

/// Table of embedded chunks shared by the indexer (writer) and the retriever (reader).
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Embedding dimension every row in the store carries.
    fn dimension(&self) -> usize;

    /// Replace every chunk of `source_id` with `chunks` in one atomic write.
    ///
    /// Readers observe either the previous chunk set or the new one, never a mix.
    async fn upsert_source(
        &self,
        source_id: &str,
        fingerprint: &str,
        chunks: Vec<TextChunk>,
    ) -> Result<(), AppError>;

    /// Fingerprint recorded by the last successful upsert of `source_id`.
    async fn source_fingerprint(&self, source_id: &str) -> Result<Option<String>, AppError>;

    /// The `k` chunks nearest to `query_embedding` by cosine similarity.
    async fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError>;
}

#[derive(Debug, Clone, Serialize)]
struct ChunkRow {
    chunk_id: String,
    source_id: String,
    sequence_index: u32,
    text: String,
    embedding: Vec<f32>,
}

/// Brute-force cosine store over the `text_chunk` table.
#[derive(Clone)]
pub struct SurrealChunkStore {
    db: Arc<SurrealDbClient>,
    dimension: usize,
}

impl SurrealChunkStore {
    pub fn new(db: Arc<SurrealDbClient>, dimension: usize) -> Result<Self, AppError> {
        if dimension == 0 {
            return Err(AppError::Config(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        Ok(Self { db, dimension })
    }

    fn validate_rows(&self, source_id: &str, chunks: Vec<TextChunk>) -> Result<Vec<ChunkRow>, AppError> {
        chunks
            .into_iter()
            .map(|chunk| {
                if chunk.source_id != source_id {
                    return Err(AppError::DataIntegrity(format!(
                        "chunk {} belongs to source '{}', not '{source_id}'",
                        chunk.id, chunk.source_id
                    )));
                }
                if chunk.embedding.len() != self.dimension {
                    return Err(AppError::DataIntegrity(format!(
                        "chunk {} has embedding dimension {}, expected {}",
                        chunk.id,
                        chunk.embedding.len(),
                        self.dimension
                    )));
                }
                Ok(ChunkRow {
                    chunk_id: chunk.id,
                    source_id: chunk.source_id,
                    sequence_index: chunk.sequence_index,
                    text: chunk.text,
                    embedding: chunk.embedding,
                })
            })
            .collect()
    }

    async fn write_source(
        &self,
        source_id: &str,
        fingerprint: &str,
        rows: &[ChunkRow],
    ) -> Result<(), surrealdb::Error> {
        let query = format!(
            "BEGIN TRANSACTION;
             DELETE {chunks} WHERE source_id = $source_id;
             FOR $row IN $rows {{
                 CREATE type::thing('{chunks}', $row.chunk_id) CONTENT {{
                     source_id: $row.source_id,
                     sequence_index: $row.sequence_index,
                     text: $row.text,
                     embedding: $row.embedding,
                     created_at: time::now(),
                     updated_at: time::now()
                 }};
             }};
             UPSERT type::thing('{sources}', $source_id) CONTENT {{
                 source_id: $source_id,
                 fingerprint: $fingerprint,
                 chunk_count: $chunk_count,
                 created_at: time::now(),
                 updated_at: time::now()
             }};
             COMMIT TRANSACTION;",
            chunks = TextChunk::table_name(),
            sources = SourceDocument::table_name(),
        );

        self.db
            .client
            .query(query)
            .bind(("source_id", source_id.to_owned()))
            .bind(("fingerprint", fingerprint.to_owned()))
            .bind(("chunk_count", rows.len()))
            .bind(("rows", rows.to_vec()))
            .await?
            .check()?;

        Ok(())
    }
}

fn is_retryable_conflict(error: &surrealdb::Error) -> bool {
    error
        .to_string()
        .contains("Failed to commit transaction due to a read or write conflict")
}

fn unavailable(error: surrealdb::Error) -> AppError {
    AppError::StoreUnavailable(error.to_string())
}

#[async_trait]
impl ChunkStore for SurrealChunkStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert_source(
        &self,
        source_id: &str,
        fingerprint: &str,
        chunks: Vec<TextChunk>,
    ) -> Result<(), AppError> {
        let rows = self.validate_rows(source_id, chunks)?;

        let mut backoff_ms = WRITE_INITIAL_BACKOFF_MS;
        let last_attempt = WRITE_ATTEMPTS.saturating_sub(1);

        for attempt in 0..WRITE_ATTEMPTS {
            match self.write_source(source_id, fingerprint, &rows).await {
                Ok(()) => {
                    debug!(%source_id, chunk_count = rows.len(), "source chunks replaced");
                    return Ok(());
                }
                Err(err) if is_retryable_conflict(&err) && attempt < last_attempt => {
                    warn!(
                        %source_id,
                        attempt = attempt.saturating_add(1),
                        "Transient SurrealDB conflict while replacing source chunks; retrying"
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(WRITE_MAX_BACKOFF_MS);
                }
                Err(err) => return Err(unavailable(err)),
            }
        }

        Err(AppError::StoreUnavailable(format!(
            "failed to replace chunks of '{source_id}' after {WRITE_ATTEMPTS} attempts"
        )))
    }

    async fn source_fingerprint(&self, source_id: &str) -> Result<Option<String>, AppError> {
        let document: Option<SourceDocument> = self
            .db
            .get_item(source_id)
            .await
            .map_err(unavailable)?;
        Ok(document.map(|doc| doc.fingerprint))
    }

    async fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        if query_embedding.len() != self.dimension {
            return Err(AppError::Config(format!(
                "query embedding has dimension {}, the store holds dimension {}",
                query_embedding.len(),
                self.dimension
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT * FROM {} WHERE array::len(embedding) = $dimension",
            TextChunk::table_name()
        );
        let mut response = self
            .db
            .client
            .query(query)
            .bind(("dimension", self.dimension))
            .await
            .map_err(unavailable)?;
        let rows: Vec<TextChunk> = response.take(0).map_err(unavailable)?;

        Ok(rank_chunks(query_embedding, rows, k))
    }
}

/// Score `rows` against the query and keep the best `k`.
///
/// Order: descending score, then larger `sequence_index`, then ascending id.
/// Rows whose dimension differs from the query are never returned.
pub fn rank_chunks(query_embedding: &[f32], rows: Vec<TextChunk>, k: usize) -> Vec<RetrievedChunk> {
    let mut scored: Vec<RetrievedChunk> = rows
        .into_iter()
        .filter(|chunk| chunk.embedding.len() == query_embedding.len())
        .map(|chunk| {
            let score = cosine_similarity(query_embedding, &chunk.embedding);
            RetrievedChunk { chunk, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.chunk.sequence_index.cmp(&a.chunk.sequence_index))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    scored.truncate(k);
    scored
}
