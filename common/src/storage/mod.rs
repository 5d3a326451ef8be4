pub mod chunk_store;
pub mod db;
pub mod store;
pub mod types;
