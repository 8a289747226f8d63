//! Core identifiers for tables, rows, columns, cells, and generation sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// TableId: Stable identifier of a table in the registry
pub type TableId = String;

/// RowId: Identifier of a row within a table (the row's `ID` field)
pub type RowId = String;

/// ColumnId: Identifier of a column within a table schema
pub type ColumnId = String;

/// Address of a single cell: (row, column)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub row_id: RowId,
    pub column_id: ColumnId,
}

impl CellAddress {
    pub fn new(row_id: impl Into<RowId>, column_id: impl Into<ColumnId>) -> Self {
        Self {
            row_id: row_id.into(),
            column_id: column_id.into(),
        }
    }

    /// Parse `row:column` notation used by the CLI.
    pub fn parse(raw: &str) -> Option<Self> {
        let (row, column) = raw.split_once(':')?;
        if row.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(row, column))
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row_id, self.column_id)
    }
}

/// SessionId: Monotonic identifier of one generation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}
