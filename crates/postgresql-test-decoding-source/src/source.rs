//! Change source contract

use anyhow::Result;
use async_trait::async_trait;

use crate::lsn::Lsn;

/// One record as returned by the change stream, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// Position of the record
    pub lsn: Lsn,
    /// Transaction id, as text
    pub xid: String,
    /// The output plugin's rendering of the record
    pub data: String,
}

/// A consumable, ordered feed of change records.
///
/// Fetching consumes: a record returned once is never returned again,
/// whether or not the caller managed to persist it. A crash between a
/// fetch and the following watermark commit therefore loses that fetch's
/// records rather than replaying them.
#[async_trait]
pub trait ChangeSource: Send {
    /// Fetch records not yet handed out, in stream order, at most `limit`
    /// of them when set.
    ///
    /// `cursor` is the last committed watermark (`None` before the first
    /// commit). A source uses it to resume after that point when it starts,
    /// not to filter individual records: rows arrive in commit order, so a
    /// row of a late-committing transaction can carry a position below the
    /// cursor and must still be returned.
    async fn fetch_since(
        &mut self,
        cursor: Option<&Lsn>,
        limit: Option<u32>,
    ) -> Result<Vec<RawChange>>;
}
