//! PostgreSQL change extraction using the test_decoding output plugin
//!
//! This library polls a pre-provisioned logical replication slot over a
//! regular SQL connection, decodes the `test_decoding` text lines into row
//! change events, writes each non-empty batch to object storage as a CSV
//! artifact and then advances a persisted watermark.
//!
//! # Extraction
//!
//! ```ignore
//! use std::sync::Arc;
//! use cdc_extract_object_store::{Destination, S3Settings};
//! use cdc_extract_postgresql_test_decoding_source::{
//!     CsvMaterializer, ExtractionLoop, LoopConfig, PgSlotSource, SystemClock,
//! };
//! use watermark::ObjectWatermarkStore;
//!
//! let objects = Destination::parse("s3://raw/inc")?
//!     .open(&S3Settings::default(), false)
//!     .await?;
//! let clock = Arc::new(SystemClock);
//!
//! let source = PgSlotSource::connect("host=localhost user=postgres", "data_sync_slot").await?;
//! let materializer = CsvMaterializer::new(objects.clone(), clock.clone());
//! let watermarks = ObjectWatermarkStore::new(objects);
//!
//! let extraction =
//!     ExtractionLoop::start(LoopConfig::default(), source, materializer, watermarks, clock)
//!         .await?;
//! extraction.run(shutdown_rx).await?;
//! ```
//!
//! # Delivery
//!
//! A watermark is only committed after the artifact holding every change up
//! to it has been stored. Fetching from the slot consumes, so a crash
//! between a fetch and its commit loses that fetch's changes.

mod change;
mod clock;
mod error;
mod incremental_sync;
mod logical_replication;
mod lsn;
mod materialize;
mod source;

// Make testing module available for integration tests
#[doc(hidden)]
pub mod testing;

pub use change::{decode_line, ChangeEvent, Columns, DecodedRow, Operation};
pub use clock::{Clock, SystemClock};
pub use error::{ExtractError, Result};
pub use incremental_sync::{
    CycleOutcome, ExtractionLoop, LoopConfig, LoopState, LoopStats, DEFAULT_POLL_INTERVAL,
};
pub use logical_replication::{PgSlotSource, EXPECTED_PLUGIN};
pub use lsn::Lsn;
pub use materialize::{
    encode_csv, ArtifactId, ArtifactNamer, BatchMaterializer, CsvMaterializer, FIXED_COLUMNS,
    SOURCE_COLUMN_PREFIX,
};
pub use source::{ChangeSource, RawChange};
