//! Change event data structures and decoding of `test_decoding` output
//!
//! The `test_decoding` output plugin renders every row change as one text
//! line:
//!
//! ```text
//! table <schema>.<table>: <OP>: <col1>[<type1>]:<value1> <col2>[<type2>]:<value2> ...
//! ```
//!
//! where `<OP>` is INSERT, UPDATE or DELETE and each value is either a
//! single-quoted string or a bare token ending at whitespace. Everything
//! else the plugin emits (`BEGIN 501`, `COMMIT 501`, ...) is not a row
//! change and decodes to `None`.
//!
//! Grammar, matched case-insensitively from the start of the line:
//!
//! ```text
//! outer:  table\s+([^.]+)\.([^\s:]+):\s+(INSERT|UPDATE|DELETE):\s*(.*)
//! column: (\w+)\[[^\]]+\]:(?:'([^']*)'|(\S+))
//! ```
//!
//! Column fragments are collected left to right over the tail; fragments
//! that do not match are skipped. Quoted values are taken literally with no
//! escape processing, so a doubled quote (`'O''Brien'`) ends the value at
//! the first inner quote.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::lsn::Lsn;
use crate::source::RawChange;

static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^table\s+([^.]+)\.([^\s:]+):\s+(INSERT|UPDATE|DELETE):\s*(.*)")
        .expect("row change regex is valid")
});

static COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+)\[[^\]]+\]:(?:'([^']*)'|(\S+))").expect("column regex is valid")
});

/// Column name to textual value, in order of first appearance
pub type Columns = IndexMap<String, String>;

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => anyhow::bail!("Unknown row operation: {other}"),
        }
    }
}

/// The structural content of one row-change line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow {
    pub operation: Operation,
    pub schema: String,
    pub table: String,
    pub columns: Columns,
}

/// One decoded mutation together with its place in the change stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Position of the record in the change stream
    pub lsn: Lsn,
    /// Originating transaction id (informational)
    pub xid: String,
    pub operation: Operation,
    pub schema: String,
    pub table: String,
    /// Column values as text; DELETE usually carries only the key columns
    pub columns: Columns,
}

impl ChangeEvent {
    /// Decode a raw change-stream record.
    ///
    /// Returns `None` for records that are not row changes.
    pub fn decode(raw: &RawChange) -> Option<Self> {
        let row = decode_line(&raw.data)?;
        Some(Self {
            lsn: raw.lsn.clone(),
            xid: raw.xid.clone(),
            operation: row.operation,
            schema: row.schema,
            table: row.table,
            columns: row.columns,
        })
    }
}

/// Decode one `test_decoding` line.
///
/// Returns `None` when the line is not an INSERT/UPDATE/DELETE record.
/// Never fails: malformed column fragments are simply left out.
pub fn decode_line(line: &str) -> Option<DecodedRow> {
    let captures = TABLE_RE.captures(line)?;

    // The regex only admits the three operations, so this cannot fail
    let operation = captures[3].parse().ok()?;
    let tail = captures.get(4).map_or("", |m| m.as_str());

    let mut columns = Columns::new();
    for column in COLUMN_RE.captures_iter(tail) {
        let value = column
            .get(2)
            .or_else(|| column.get(3))
            .map_or("", |m| m.as_str());
        // IndexMap keeps the first-seen slot and replaces the value
        columns.insert(column[1].to_string(), value.to_string());
    }

    Some(DecodedRow {
        operation,
        schema: captures[1].to_string(),
        table: captures[2].to_string(),
        columns,
    })
}
