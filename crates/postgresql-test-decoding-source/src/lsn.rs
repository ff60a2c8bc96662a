//! PostgreSQL log sequence numbers
//!
//! An LSN is the position of a record in the WAL stream and serves as the
//! extraction cursor. PostgreSQL renders it as two hexadecimal halves
//! separated by a slash (`0/16B3748`).

use anyhow::Result;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A position in the change stream
///
/// Keeps the text exactly as the server reported it, so it can be persisted
/// and read back verbatim, and orders by numeric value. Plain string
/// comparison would put `0/FF` after `0/100`.
#[derive(Debug, Clone)]
pub struct Lsn {
    text: String,
    value: u64,
}

impl Lsn {
    /// Parse an LSN from its textual form (e.g. "0/1949850")
    pub fn parse(s: &str) -> Result<Self> {
        let text = s.trim();
        let (hi, lo) = text.split_once('/').ok_or_else(|| {
            anyhow::anyhow!("Invalid LSN: expected format like '0/1949850', got '{s}'")
        })?;

        let parse_half = |half: &str| -> Result<u64> {
            // from_str_radix alone would accept a sign
            let digits_only = half.bytes().all(|b| b.is_ascii_hexdigit());
            if half.is_empty() || half.len() > 8 || !digits_only {
                anyhow::bail!("Invalid LSN: expected format like '0/1949850', got '{s}'");
            }
            u64::from_str_radix(half, 16)
                .map_err(|e| anyhow::anyhow!("Invalid LSN '{s}': {e}"))
        };

        let value = (parse_half(hi)? << 32) | parse_half(lo)?;
        Ok(Self {
            text: text.to_string(),
            value,
        })
    }

    /// The text as received
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The 64-bit WAL position
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Lsn {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Lsn {}

impl Hash for Lsn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for Lsn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lsn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl std::str::FromStr for Lsn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
