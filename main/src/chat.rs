use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use common::utils::{config::get_config, generation::OpenAiGenerator};
use pension_assistant::{init_tracing, Services};
use retrieval_pipeline::{ChatRouter, CustomerProfile, RetrievalConfig, RetrievalOrchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::error;

/// Answer pension and insurance questions read line by line from stdin.
#[derive(Parser, Debug)]
#[command(name = "chat", version)]
struct Args {
    /// JSON file describing the customer and the products they hold.
    #[arg(long)]
    profile: Option<PathBuf>,
}

async fn load_profile(path: Option<PathBuf>) -> Result<CustomerProfile, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path).await?;
            Ok(CustomerProfile::from_json(&raw)?)
        }
        None => Ok(CustomerProfile {
            id: "guest".to_string(),
            ..CustomerProfile::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = get_config()?;
    let profile = load_profile(args.profile).await?;
    let retrieval_config = RetrievalConfig::from_app_config(&config)?;

    let services = Services::connect(&config).await?;
    let retrieval = Arc::new(RetrievalOrchestrator::new(
        Arc::clone(&services.embedding),
        Arc::clone(&services.chunk_store),
        retrieval_config,
    )?);
    let generator = Arc::new(OpenAiGenerator::from_config(
        &config,
        Arc::clone(&services.openai_client),
    ));
    let router = ChatRouter::with_default_responders(generator, Arc::clone(&retrieval));

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{}\n> ", profile.greeting()).as_bytes())
        .await?;
    stdout.flush().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            continue;
        }
        if matches!(message, "exit" | "quit") {
            break;
        }
        if message == "/reload" {
            retrieval.clear_cache().await;
            stdout.write_all(b"Reference data reloaded.\n> ").await?;
            stdout.flush().await?;
            continue;
        }

        let reply = match router.reply(message, &profile).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "failed to answer message");
                "Sorry, something went wrong while answering. Please try again.".to_string()
            }
        };
        stdout.write_all(format!("{reply}\n> ").as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
