use common::{
    error::AppError,
    storage::{chunk_store::ChunkStore, types::text_chunk::TextChunk},
};
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use super::{
    context::PipelineContext,
    state::{Chunked, Embedded, IndexingMachine, Persisted, Ready},
};
use crate::{chunker::chunk_text, embedder::BatchEmbedder};

#[instrument(level = "trace", skip_all, fields(source_id = %ctx.source_id))]
pub fn chunk(
    machine: IndexingMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IndexingMachine<(), Chunked>, AppError> {
    let chunks = chunk_text(ctx.text, &ctx.pipeline_config.chunking)?;

    debug!(
        source_id = %ctx.source_id,
        text_chars = ctx.text.chars().count(),
        chunk_count = chunks.len(),
        "document chunked"
    );

    ctx.chunks = chunks;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(level = "trace", skip_all, fields(source_id = %ctx.source_id))]
pub async fn embed(
    machine: IndexingMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
    embedder: &BatchEmbedder,
) -> Result<IndexingMachine<(), Embedded>, AppError> {
    let embeddings = embedder.embed_all(&ctx.chunks).await?;

    debug!(
        source_id = %ctx.source_id,
        embedding_count = embeddings.len(),
        dimension = embedder.dimension(),
        "chunks embedded"
    );

    ctx.embeddings = embeddings;

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(level = "trace", skip_all, fields(source_id = %ctx.source_id))]
pub async fn persist(
    machine: IndexingMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
    store: &dyn ChunkStore,
) -> Result<IndexingMachine<(), Persisted>, AppError> {
    let texts = ctx.take_chunks();
    let embeddings = ctx.take_embeddings();
    if texts.len() != embeddings.len() {
        return Err(AppError::DataIntegrity(format!(
            "{} chunks but {} embeddings",
            texts.len(),
            embeddings.len()
        )));
    }

    let chunks = texts
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(idx, (text, embedding))| {
            let sequence_index = u32::try_from(idx).map_err(|_| {
                AppError::DataIntegrity(format!("chunk index {idx} exceeds u32 range"))
            })?;
            Ok(TextChunk::new(
                ctx.source_id.to_string(),
                sequence_index,
                text,
                embedding,
            ))
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    let chunk_count = chunks.len();

    store
        .upsert_source(ctx.source_id, &ctx.fingerprint, chunks)
        .await?;

    debug!(
        source_id = %ctx.source_id,
        chunk_count,
        "source chunks persisted"
    );

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid indexing pipeline transition during {event}: {guard:?}"
    ))
}
