use async_openai::error::{ApiError, OpenAIError};
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid parameters or dimension mismatches; raised before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Timeouts, rate limits and 5xx responses from an external service.
    #[error("Transient service error: {0}")]
    TransientService(String),
    /// Embedding count or dimension mismatches. Never retried.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Embedding batch {batch_index} failed: {cause}")]
    EmbeddingBatch {
        batch_index: usize,
        #[source]
        cause: Box<AppError>,
    },
    #[error("Indexing source '{source_id}' failed: {cause}")]
    Source {
        source_id: String,
        #[source]
        cause: Box<AppError>,
    },
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a bounded retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientService(_)
            | AppError::StoreUnavailable(_)
            | AppError::OpenAI(OpenAIError::Reqwest(_)) => true,
            AppError::OpenAI(OpenAIError::ApiError(api)) => api_error_is_transient(api),
            AppError::EmbeddingBatch { cause, .. } | AppError::Source { cause, .. } => {
                cause.is_transient()
            }
            _ => false,
        }
    }

    /// Map a failed OpenAI call onto the taxonomy: transport failures, rate
    /// limits and server errors are transient, every other API error is final.
    pub fn from_openai(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(inner) => AppError::TransientService(inner.to_string()),
            OpenAIError::ApiError(api) if api_error_is_transient(&api) => {
                AppError::TransientService(api.message)
            }
            other => AppError::OpenAI(other),
        }
    }

    pub fn in_batch(self, batch_index: usize) -> Self {
        AppError::EmbeddingBatch {
            batch_index,
            cause: Box::new(self),
        }
    }

    pub fn for_source(self, source_id: impl Into<String>) -> Self {
        AppError::Source {
            source_id: source_id.into(),
            cause: Box::new(self),
        }
    }
}

const TRANSIENT_API_ERRORS: [&str; 3] = ["rate_limit_exceeded", "server_error", "overloaded"];

fn api_error_is_transient(api: &ApiError) -> bool {
    [api.code.as_deref(), api.r#type.as_deref()]
        .into_iter()
        .flatten()
        .any(|kind| TRANSIENT_API_ERRORS.contains(&kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_follows_taxonomy() {
        assert!(AppError::TransientService("rate limited".into()).is_transient());
        assert!(AppError::StoreUnavailable("down".into()).is_transient());
        assert!(!AppError::DataIntegrity("2 != 3".into()).is_transient());
        assert!(!AppError::Config("overlap".into()).is_transient());
    }

    #[test]
    fn context_wrappers_keep_cause_and_context() {
        let err = AppError::DataIntegrity("expected 4 embeddings, got 3".into())
            .in_batch(2)
            .for_source("pensions/guide.pdf");

        let message = err.to_string();
        assert!(message.contains("pensions/guide.pdf"));
        assert!(message.contains("batch 2"));
        assert!(message.contains("expected 4 embeddings"));
        assert!(!err.is_transient());

        let transient = AppError::TransientService("timeout".into()).in_batch(0);
        assert!(transient.is_transient());
    }

    fn api_error(code: Option<&str>, kind: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "request failed".to_string(),
            r#type: kind.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn openai_client_errors_are_final() {
        let invalid_key = AppError::from_openai(api_error(
            Some("invalid_api_key"),
            Some("invalid_request_error"),
        ));
        assert!(matches!(invalid_key, AppError::OpenAI(_)));
        assert!(!invalid_key.is_transient());

        let unknown_model = AppError::from_openai(api_error(Some("model_not_found"), None));
        assert!(!unknown_model.in_batch(1).is_transient());
    }

    #[test]
    fn openai_rate_limits_and_server_errors_are_transient() {
        let rate_limited = AppError::from_openai(api_error(
            Some("rate_limit_exceeded"),
            Some("requests"),
        ));
        assert!(matches!(rate_limited, AppError::TransientService(_)));

        let server = AppError::from_openai(api_error(None, Some("server_error")));
        assert!(server.is_transient());

        assert!(AppError::OpenAI(api_error(None, Some("server_error"))).is_transient());
        assert!(!AppError::OpenAI(api_error(None, None)).is_transient());
    }
}
