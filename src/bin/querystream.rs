//! querystream - customer query pipeline over NATS JetStream
//!
//! Provisions the pipeline topics, then runs the intake, classification,
//! response, review and dashboard stages concurrently for a fixed duration.

use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use querystream::config::{api_key_from, DEFAULT_RUN_UNITS};
use querystream::{OpenAiClient, Orchestrator, PipelineConfig, PipelineError};

#[derive(Parser)]
#[command(name = "querystream")]
#[command(version, about = "Multi-stage customer query pipeline", long_about = None)]
struct Cli {
    /// Total run duration, in time units (seconds unless QUERYSTREAM_TIME_UNIT_MS is set)
    #[arg(short, long, default_value_t = DEFAULT_RUN_UNITS)]
    duration: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(cli.duration).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(duration_units: u64) -> Result<(), PipelineError> {
    let config = PipelineConfig::load()?;
    let api_key = api_key_from(|key| std::env::var(key).ok())?;

    let completion = OpenAiClient::new(config.openai(api_key))?;

    let duration = config.units(duration_units);
    let orchestrator = Orchestrator::new(
        config.clone(),
        Arc::new(config.nats()),
        Arc::new(completion),
    );

    orchestrator.run_system(duration).await
}
