use crate::stored_object;
use sha2::{Digest, Sha256};

stored_object!(TextChunk, "text_chunk", {
    /// Identifier of the document this chunk was cut from
    source_id: String,
    /// Position of the chunk within its document, starting at 0
    sequence_index: u32,
    text: String,
    embedding: Vec<f32>
});

impl TextChunk {
    pub fn new(source_id: String, sequence_index: u32, text: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Self::derive_id(&source_id, sequence_index),
            created_at: now,
            updated_at: now,
            source_id,
            sequence_index,
            text,
            embedding,
        }
    }

    /// Stable chunk id: a digest of the source identifier followed by the
    /// zero-padded sequence index. Re-chunking the same source reproduces the
    /// same ids, so an upsert replaces rather than duplicates.
    pub fn derive_id(source_id: &str, sequence_index: u32) -> String {
        let digest = Sha256::digest(source_id.as_bytes());
        let hex = format!("{digest:x}");
        let prefix = hex.get(..16).unwrap_or(&hex);
        format!("{prefix}-{sequence_index:06}")
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}
