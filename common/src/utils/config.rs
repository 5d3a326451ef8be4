use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::utils::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Unit in which chunk sizes and overlaps are measured.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Characters,
    Words,
}

/// What the indexer does when a single source fails.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Abort,
    #[default]
    SkipAndLog,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_documents_prefix")]
    pub documents_prefix: String,
    #[serde(default = "default_chunk_max_size")]
    pub chunk_max_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_chunk_unit")]
    pub chunk_unit: ChunkUnit,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default = "default_embedding_max_attempts")]
    pub embedding_max_attempts: usize,
    #[serde(default = "default_embedding_initial_backoff_ms")]
    pub embedding_initial_backoff_ms: u64,
    #[serde(default = "default_embedding_max_backoff_ms")]
    pub embedding_max_backoff_ms: u64,
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub force_reindex: bool,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_query_cache_capacity")]
    pub query_cache_capacity: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    768
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_documents_prefix() -> String {
    "pensions/".to_string()
}

fn default_chunk_max_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_chunk_unit() -> ChunkUnit {
    ChunkUnit::Words
}

fn default_embedding_batch_size() -> usize {
    20
}

fn default_embedding_concurrency() -> usize {
    2
}

fn default_embedding_max_attempts() -> usize {
    4
}

fn default_embedding_initial_backoff_ms() -> u64 {
    250
}

fn default_embedding_max_backoff_ms() -> u64 {
    8_000
}

fn default_service_timeout_secs() -> u64 {
    30
}

fn default_retrieval_top_k() -> usize {
    5
}

fn default_query_cache_capacity() -> usize {
    256
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Offline configuration: in-memory database and documents, hashed embeddings.
    pub fn test_config() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "test_ns".to_string(),
            surrealdb_database: "test_db".to_string(),
            embedding_backend: EmbeddingBackend::Hashed,
            embedding_model: default_embedding_model(),
            embedding_dimensions: 16,
            generation_model: default_generation_model(),
            storage: StorageKind::Memory,
            data_dir: default_data_dir(),
            documents_prefix: default_documents_prefix(),
            chunk_max_size: 40,
            chunk_overlap: 8,
            chunk_unit: ChunkUnit::Characters,
            embedding_batch_size: 4,
            embedding_concurrency: 2,
            embedding_max_attempts: 3,
            embedding_initial_backoff_ms: 1,
            embedding_max_backoff_ms: 5,
            service_timeout_secs: 5,
            failure_policy: FailurePolicy::SkipAndLog,
            force_reindex: false,
            retrieval_top_k: 3,
            query_cache_capacity: 8,
        }
    }
}
