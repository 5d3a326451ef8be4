use common::error::AppError;

/// Document formats the indexer knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
    Markdown,
}

impl DocumentKind {
    /// Classify an object key by its extension; `None` for anything unsupported.
    pub fn from_key(key: &str) -> Option<Self> {
        let (_, extension) = key.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Extract the text of a document, trimmed. PDFs are read from their text layer
/// on the blocking pool.
pub async fn extract_text(kind: DocumentKind, bytes: Vec<u8>) -> Result<String, AppError> {
    match kind {
        DocumentKind::Pdf => {
            let text = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&bytes).map(|s| s.trim().to_string())
            })
            .await?
            .map_err(|err| {
                AppError::Processing(format!("Failed to extract text from PDF: {err}"))
            })?;
            Ok(text)
        }
        DocumentKind::PlainText | DocumentKind::Markdown => {
            let text = String::from_utf8(bytes).map_err(|err| {
                AppError::Processing(format!("Document is not valid UTF-8: {err}"))
            })?;
            Ok(text.trim().to_string())
        }
    }
}
