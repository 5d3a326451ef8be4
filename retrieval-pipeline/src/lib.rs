#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer_retrieval;
pub mod pipeline;
pub mod responder;

pub use common::storage::chunk_store::RetrievedChunk;
pub use pipeline::{
    FailureCause, QueryCache, RetrievalConfig, RetrievalOrchestrator, RetrievalOutcome,
};
pub use responder::{
    classify_domain, ChatRouter, CustomerProfile, Domain, InsuranceResponder, PensionResponder,
    Responder,
};

/// Nearest chunks for one query, best first.
pub type RetrievalResult = Vec<RetrievedChunk>;
