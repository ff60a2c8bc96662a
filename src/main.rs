//! Command-line interface for cdc-extract
//!
//! # Usage Examples
//!
//! ```bash
//! # Poll every 2 seconds into MinIO, creating the bucket on first run
//! PG_CONNECTION_STRING="host=localhost user=postgres dbname=app" \
//! S3_ENDPOINT=http://localhost:9000 S3_ACCESS_KEY=minioadmin S3_SECRET_KEY=minioadmin \
//!   cdc-extract --destination s3://raw/inc --create-bucket
//!
//! # One bounded cycle, verbose
//! RUST_LOG=debug cdc-extract --connection-string "..." --batch-limit 1000 --once
//! ```
//!
//! The replication slot must exist beforehand:
//!
//! ```sql
//! SELECT pg_create_logical_replication_slot('data_sync_slot', 'test_decoding');
//! ```

use cdc_extract::{run_extraction, ExtractOpts};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = ExtractOpts::parse();
    let shutdown_rx = setup_shutdown_handler();

    let stats = run_extraction(opts, shutdown_rx).await?;
    info!(
        "Done: {} cycles, {} artifacts, {} changes",
        stats.cycles, stats.artifacts, stats.events
    );
    Ok(())
}

/// Sets up a shutdown signal handler
fn setup_shutdown_handler() -> tokio::sync::broadcast::Receiver<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C signal handler: {e}");
            // Dropping the sender would read as a stop request
            std::future::pending::<()>().await;
        }

        info!("Received interrupt signal (Ctrl+C), stopping after the current cycle");
        let _ = shutdown_tx.send(());
    });

    shutdown_rx
}
