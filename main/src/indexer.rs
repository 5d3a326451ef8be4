use std::sync::Arc;

use clap::Parser;
use common::{
    storage::store::StorageManager,
    utils::config::{get_config, FailurePolicy},
};
use ingestion_pipeline::{DocumentSource, IngestionConfig, IngestionPipeline};
use pension_assistant::{init_tracing, Services};
use tracing::{error, info};

/// Index reference documents into the chunk store.
#[derive(Parser, Debug)]
#[command(name = "indexer", version)]
struct Args {
    /// Object prefix to index; defaults to `documents_prefix` from the config.
    #[arg(long)]
    prefix: Option<String>,

    /// Re-index sources whose content has not changed.
    #[arg(long)]
    force: bool,

    /// Stop at the first source that fails instead of skipping it.
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let mut config = get_config()?;
    if args.force {
        config.force_reindex = true;
    }
    if args.fail_fast {
        config.failure_policy = FailurePolicy::Abort;
    }
    let prefix = args
        .prefix
        .unwrap_or_else(|| config.documents_prefix.clone());

    let pipeline_config = IngestionConfig::from_app_config(&config)?;
    let services = Services::connect(&config).await?;
    let storage = StorageManager::new(&config).await?;
    let source = DocumentSource::new(storage);

    let pipeline = IngestionPipeline::new(
        Arc::clone(&services.chunk_store),
        Arc::clone(&services.embedding),
        pipeline_config,
    )?;

    let report = match pipeline.index_all(&source, &prefix).await {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "indexing aborted");
            return Err(err.into());
        }
    };

    for failed in &report.failed {
        println!("failed    {}: {}", failed.source_id, failed.reason);
    }
    println!(
        "indexed {} | unchanged {} | empty {} | failed {} | chunks written {}",
        report.indexed.len(),
        report.unchanged.len(),
        report.skipped_empty.len(),
        report.failed.len(),
        report.chunks_written
    );
    info!(%prefix, "indexer finished");

    Ok(())
}
