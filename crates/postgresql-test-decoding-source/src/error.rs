//! Error types for the extraction loop.

use thiserror::Error;

/// Fatal extraction errors.
///
/// None of these are retried in-process; recovery is a restart from the
/// last committed watermark. Lines that do not decode are not errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("change source unavailable")]
    Source(#[source] anyhow::Error),

    #[error("failed to materialize batch")]
    Materialize(#[source] anyhow::Error),

    #[error("failed to access watermark")]
    Watermark(#[source] anyhow::Error),

    #[error("persisted watermark '{value}' is not a valid position: {reason}")]
    InvalidWatermark { value: String, reason: String },
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
