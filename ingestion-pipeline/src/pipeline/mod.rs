mod config;
mod context;
mod stages;
mod state;

pub use config::IngestionConfig;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{chunk_store::ChunkStore, types::source_document::SourceDocument},
    utils::{config::FailurePolicy, embedding::EmbeddingService},
};
use tracing::{info, warn};

use self::{
    context::PipelineContext,
    stages::{chunk, embed, persist},
    state::ready,
};
use crate::{
    embedder::BatchEmbedder,
    utils::document_source::{DocumentRef, DocumentSource},
};

/// What happened to a single source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Indexed { chunk_count: usize },
    /// Fingerprint matched the stored one; nothing was written.
    Unchanged,
    /// No text to index; nothing was written.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSource {
    pub source_id: String,
    pub reason: String,
}

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped_empty: Vec<String>,
    pub failed: Vec<FailedSource>,
    pub chunks_written: usize,
}

impl IndexReport {
    fn record(&mut self, source_id: &str, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::Indexed { chunk_count } => {
                self.indexed.push(source_id.to_string());
                self.chunks_written = self.chunks_written.saturating_add(chunk_count);
            }
            DocumentOutcome::Unchanged => self.unchanged.push(source_id.to_string()),
            DocumentOutcome::Empty => self.skipped_empty.push(source_id.to_string()),
        }
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    store: Arc<dyn ChunkStore>,
    embedder: BatchEmbedder,
    pipeline_config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedding_service: Arc<dyn EmbeddingService>,
        pipeline_config: IngestionConfig,
    ) -> Result<Self, AppError> {
        if store.dimension() != embedding_service.dimension() {
            return Err(AppError::Config(format!(
                "embedding service produces dimension {}, the store holds dimension {}",
                embedding_service.dimension(),
                store.dimension()
            )));
        }
        pipeline_config.chunking.validate()?;
        let embedder = BatchEmbedder::new(embedding_service, pipeline_config.embedding.clone())?;

        Ok(Self {
            store,
            embedder,
            pipeline_config,
        })
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    fn fingerprint(&self, text: &str) -> String {
        let layout = format!(
            "{}|dim={}",
            self.pipeline_config.chunking.layout(),
            self.embedder.dimension()
        );
        SourceDocument::fingerprint(text, &layout)
    }

    /// Chunk, embed and persist one document, replacing any chunks previously
    /// stored for `source_id`. An empty document clears them.
    #[tracing::instrument(skip_all, fields(source_id = %source_id))]
    pub async fn index_document(
        &self,
        source_id: &str,
        text: &str,
    ) -> Result<DocumentOutcome, AppError> {
        self.drive_pipeline(source_id, text)
            .await
            .map_err(|err| err.for_source(source_id))
    }

    async fn drive_pipeline(
        &self,
        source_id: &str,
        text: &str,
    ) -> Result<DocumentOutcome, AppError> {
        if text.trim().is_empty() {
            let fingerprint = self.fingerprint("");
            let stored = self.store.source_fingerprint(source_id).await?;
            if stored.is_some_and(|stored| stored != fingerprint) {
                self.store
                    .upsert_source(source_id, &fingerprint, Vec::new())
                    .await?;
                info!(%source_id, "source is now empty; previous chunks removed");
            }
            return Ok(DocumentOutcome::Empty);
        }

        let fingerprint = self.fingerprint(text);
        if !self.pipeline_config.force_reindex
            && self.store.source_fingerprint(source_id).await?.as_deref()
                == Some(fingerprint.as_str())
        {
            info!(%source_id, "source unchanged since last run; skipping");
            return Ok(DocumentOutcome::Unchanged);
        }

        let mut ctx = PipelineContext::new(source_id, text, fingerprint, &self.pipeline_config);
        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = chunk(machine, &mut ctx).map_err(|err| ctx.abort(err))?;
        let chunk_duration = stage_start.elapsed();
        let chunk_count = ctx.chunks.len();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx, &self.embedder)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = persist(machine, &mut ctx, self.store.as_ref())
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        info!(
            %source_id,
            chunk_count,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            chunk_ms = Self::duration_millis(chunk_duration),
            embed_ms = Self::duration_millis(embed_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "source indexed"
        );

        Ok(DocumentOutcome::Indexed { chunk_count })
    }

    /// Index every supported document below `prefix`, in key order.
    ///
    /// Under [`FailurePolicy::Abort`] the first failing source ends the run with
    /// its error; under [`FailurePolicy::SkipAndLog`] it is recorded in the
    /// report and the run continues.
    #[tracing::instrument(skip_all, fields(%prefix))]
    pub async fn index_all(
        &self,
        source: &DocumentSource,
        prefix: &str,
    ) -> Result<IndexReport, AppError> {
        let documents = source.list(prefix).await?;
        let run_started = Instant::now();
        let mut report = IndexReport::default();

        info!(document_count = documents.len(), "indexing run started");

        for document in &documents {
            match self.index_one(source, document).await {
                Ok(outcome) => report.record(&document.key, outcome),
                Err(err) => match self.pipeline_config.failure_policy {
                    FailurePolicy::Abort => return Err(err),
                    FailurePolicy::SkipAndLog => {
                        warn!(source_id = %document.key, error = %err, "skipping failed source");
                        report.failed.push(FailedSource {
                            source_id: document.key.clone(),
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            indexed = report.indexed.len(),
            unchanged = report.unchanged.len(),
            skipped_empty = report.skipped_empty.len(),
            failed = report.failed.len(),
            chunks_written = report.chunks_written,
            total_ms = Self::duration_millis(run_started.elapsed()),
            "indexing run finished"
        );

        Ok(report)
    }

    async fn index_one(
        &self,
        source: &DocumentSource,
        document: &DocumentRef,
    ) -> Result<DocumentOutcome, AppError> {
        let text = source
            .read_text(document)
            .await
            .map_err(|err| err.for_source(&document.key))?;

        if text.is_empty() {
            warn!(source_id = %document.key, "document has no extractable text; skipping");
        }

        self.index_document(&document.key, &text).await
    }
}
