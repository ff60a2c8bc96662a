//! cdc-extract library
//!
//! Command-line options and wiring for the extractor binary. The
//! extraction protocol itself lives in the member crates:
//!
//! - `cdc_extract_postgresql_test_decoding_source` - replication slot source,
//!   line decoder, CSV materializer and the extraction loop
//! - `watermark` - durable resume position
//! - `cdc_extract_object_store` - S3 (MinIO-compatible) and local storage
//!
//! # CLI Usage
//!
//! ```bash
//! # Continuous extraction into MinIO
//! cdc-extract \
//!   --connection-string "host=localhost user=postgres dbname=app" \
//!   --slot data_sync_slot \
//!   --destination s3://raw/inc \
//!   --s3-endpoint http://localhost:9000 \
//!   --s3-access-key minioadmin --s3-secret-key minioadmin
//!
//! # Single cycle into a local directory
//! cdc-extract --connection-string "..." --destination /data/raw/inc --once
//! ```

use anyhow::Context;
use cdc_extract_object_store::{Destination, ObjectStore, S3Settings, DEFAULT_REGION};
use cdc_extract_postgresql_test_decoding_source::{
    CsvMaterializer, ExtractionLoop, LoopConfig, LoopStats, PgSlotSource, SystemClock,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use watermark::ObjectWatermarkStore;

pub mod config;

pub use config::{parse_duration, parse_poll_interval};

/// Default replication slot name
pub const DEFAULT_SLOT: &str = "data_sync_slot";

/// Default destination
pub const DEFAULT_DESTINATION: &str = "s3://raw/inc";

#[derive(Parser, Clone)]
#[command(name = "cdc-extract")]
#[command(about = "Extract PostgreSQL logical replication changes into object storage")]
#[command(long_about = None)]
pub struct ExtractOpts {
    /// Source database options
    #[command(flatten)]
    pub source: SourceOpts,

    /// Object storage options
    #[command(flatten)]
    pub storage: StorageOpts,

    /// Time between polls (e.g. "500ms", "2s", "1m"; plain numbers are seconds)
    #[arg(
        long,
        default_value = "2",
        env = "CDC_POLL_INTERVAL",
        value_parser = parse_poll_interval
    )]
    pub poll_interval: Duration,

    /// Maximum number of changes fetched per poll (unbounded if unset)
    #[arg(
        long,
        env = "CDC_BATCH_LIMIT",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub batch_limit: Option<u32>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Parser, Clone)]
pub struct SourceOpts {
    /// PostgreSQL connection string
    #[arg(long, env = "PG_CONNECTION_STRING")]
    pub connection_string: String,

    /// Logical replication slot using the test_decoding plugin
    #[arg(long, default_value = DEFAULT_SLOT, env = "PG_REPLICATION_SLOT")]
    pub slot: String,
}

#[derive(Parser, Clone)]
pub struct StorageOpts {
    /// Where artifacts and the watermark are written: s3://bucket[/prefix] or a local directory
    #[arg(long, default_value = DEFAULT_DESTINATION, env = "CDC_DESTINATION")]
    pub destination: String,

    /// S3-compatible endpoint URL (e.g. http://minio:9000)
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// S3 access key (default credential chain if unset)
    #[arg(long, env = "S3_ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "S3_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    /// S3 region
    #[arg(
        long,
        default_value = DEFAULT_REGION,
        env = "S3_REGION"
    )]
    pub s3_region: String,

    /// Create the bucket if it does not exist
    #[arg(long, env = "CDC_CREATE_BUCKET")]
    pub create_bucket: bool,
}

impl ExtractOpts {
    /// Extraction loop settings
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            poll_interval: self.poll_interval,
            batch_limit: self.batch_limit,
            once: self.once,
        }
    }
}

impl StorageOpts {
    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            endpoint: self.s3_endpoint.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            region: self.s3_region.clone(),
        }
    }

    pub fn destination(&self) -> anyhow::Result<Destination> {
        Destination::parse(&self.destination)
            .with_context(|| format!("Invalid destination: {}", self.destination))
    }

    /// Open the configured object store, creating the bucket first when
    /// asked to
    pub async fn open(&self) -> anyhow::Result<Arc<dyn ObjectStore>> {
        self.destination()?
            .open(&self.s3_settings(), self.create_bucket)
            .await
    }
}

/// Connect everything and run the extraction loop until `shutdown` fires
pub async fn run_extraction(
    opts: ExtractOpts,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<LoopStats> {
    let destination = opts.storage.destination()?;
    info!(
        "Extracting from slot '{}' to {}",
        opts.source.slot,
        destination.display_name()
    );

    let objects = opts.storage.open().await?;
    let clock = Arc::new(SystemClock);

    let source = PgSlotSource::connect(&opts.source.connection_string, &opts.source.slot).await?;
    let materializer = CsvMaterializer::new(objects.clone(), clock.clone());
    let watermarks = ObjectWatermarkStore::new(objects);
    info!("Watermark stored at {}", watermarks.display_name());

    let extraction =
        ExtractionLoop::start(opts.loop_config(), source, materializer, watermarks, clock).await?;
    let stats = extraction.run(shutdown).await?;
    Ok(stats)
}
