use crate::stored_object;
use sha2::{Digest, Sha256};

stored_object!(SourceDocument, "source_document", {
    source_id: String,
    /// Digest of the document text and the chunking parameters it was indexed with
    fingerprint: String,
    chunk_count: u32
});

impl SourceDocument {
    /// Fingerprint for a document indexed with a given chunking layout.
    ///
    /// `layout` is any stable description of the chunking parameters; changing
    /// it forces a re-index even when the text is unchanged.
    pub fn fingerprint(text: &str, layout: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(layout.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
