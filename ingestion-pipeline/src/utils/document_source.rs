use common::{error::AppError, storage::store::StorageManager};
use tracing::debug;

use super::file_text_extraction::{extract_text, DocumentKind};

/// A document discovered under the source prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Object key, used as the source identifier.
    pub key: String,
    pub kind: DocumentKind,
}

/// Read-only view of the raw documents in object storage.
#[derive(Clone)]
pub struct DocumentSource {
    storage: StorageManager,
}

impl DocumentSource {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }

    /// Supported documents below `prefix`, in lexical key order.
    pub async fn list(&self, prefix: &str) -> Result<Vec<DocumentRef>, AppError> {
        let objects = self.storage.list(Some(prefix)).await?;
        let total = objects.len();

        let documents: Vec<DocumentRef> = objects
            .into_iter()
            .filter_map(|meta| {
                let key = meta.location.to_string();
                DocumentKind::from_key(&key).map(|kind| DocumentRef { key, kind })
            })
            .collect();

        debug!(
            %prefix,
            total,
            supported = documents.len(),
            "listed source documents"
        );

        Ok(documents)
    }

    /// Extracted, trimmed text of one document. May be empty.
    pub async fn read_text(&self, document: &DocumentRef) -> Result<String, AppError> {
        let bytes = self.storage.get(&document.key).await?;
        extract_text(document.kind, bytes.to_vec()).await
    }
}
