#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{
        chunk_store::{ChunkStore, SurrealChunkStore},
        db::SurrealDbClient,
    },
    utils::{
        config::AppConfig,
        embedding::{EmbeddingProvider, EmbeddingService},
    },
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log to stderr, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn openai_client(config: &AppConfig) -> Arc<Client<OpenAIConfig>> {
    Arc::new(Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ))
}

/// Shared services both entry points are built from.
pub struct Services {
    pub openai_client: Arc<Client<OpenAIConfig>>,
    pub embedding: Arc<dyn EmbeddingService>,
    pub chunk_store: Arc<dyn ChunkStore>,
}

impl Services {
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let db = SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?;
        Self::from_db(config, db).await
    }

    /// Build the services on an already connected database.
    pub async fn from_db(config: &AppConfig, db: SurrealDbClient) -> Result<Self, AppError> {
        db.ensure_initialized().await?;

        let openai_client = openai_client(config);
        let provider = EmbeddingProvider::from_config(config, Arc::clone(&openai_client)).await?;
        let dimension = provider.dimension();
        info!(
            embedding_backend = provider.backend_label(),
            embedding_dimension = dimension,
            "embedding provider initialized"
        );

        let embedding: Arc<dyn EmbeddingService> = Arc::new(provider);
        let chunk_store: Arc<dyn ChunkStore> =
            Arc::new(SurrealChunkStore::new(Arc::new(db), dimension)?);

        Ok(Self {
            openai_client,
            embedding,
            chunk_store,
        })
    }
}
