#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod embedder;
pub mod pipeline;
pub mod utils;

pub use chunker::{chunk_text, ChunkingConfig};
pub use embedder::{BatchEmbedder, EmbeddingBatchTuning};
pub use pipeline::{DocumentOutcome, FailedSource, IndexReport, IngestionConfig, IngestionPipeline};
pub use utils::document_source::{DocumentRef, DocumentSource};
