//! LoraKiln Worker - Serverless entrypoint for LoRA training jobs
//!
//! Reads a job invocation (JSON, either a bare request or wrapped in an
//! `{"input": {...}}` envelope) from a file or stdin, drives it through the
//! training pipeline, and prints the response envelope to stdout.

use clap::Parser;
use lorakiln_core::{JobCoordinator, RawJobRequest, S3Store, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// LoraKiln Worker - LoRA training job handler
#[derive(Parser, Debug)]
#[command(name = "lorakiln-worker", author, version, about = "LoraKiln - serverless LoRA training job handler")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to the invocation JSON (reads stdin when omitted)
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::from_env()?;

    let body = match args.input {
        Some(path) => std::fs::read_to_string(&path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let invocation: serde_json::Value = serde_json::from_str(&body)?;
    let raw = RawJobRequest::from_invocation(invocation)?;

    let store = Arc::new(S3Store::new(&settings.storage)?);
    let coordinator = JobCoordinator::new(&settings, store);

    let response = coordinator.handle(raw).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
