//! ============================================================================
//! Store Module - Range-addressed access to the remote sheet
//! ============================================================================
//! The remote store is treated as a small keyed table store: read a range,
//! overwrite a range, append a row. Ranges use A1 notation
//! (`Students!E1:ZZ`, `Readers!F3:H3`, `Log`).
//!
//! ## Implementations
//! - **MemoryStore**: in-process sheets obeying the same range contract
//! - **SheetsStore**: Google Sheets v4 values API over reqwest
//! ============================================================================

mod memory;
mod range;
mod sheets;

use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryStore;
pub use range::{column_index, column_letters, CellRange};
pub use sheets::{SheetsStore, DEFAULT_SHEETS_API};

/// Rows of cell text, outer vector is rows
pub type Rows = Vec<Vec<String>>;

/// Maximum rows sent in a single write call
pub const SEND_BLOCK: usize = 500;

/// Failure talking to the remote store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid range '{0}'")]
    InvalidRange(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Narrow interface over a remote, spreadsheet-shaped store
#[async_trait]
pub trait KeyedTableStore: Send + Sync {
    /// Read the cells in `range`. Trailing empty cells and rows may be omitted.
    async fn read_range(&self, range: &str) -> Result<Rows, StoreError>;

    /// Overwrite the cells in `range` starting at its top-left corner
    async fn write_range(&self, range: &str, rows: Rows) -> Result<(), StoreError>;

    /// Append one row after the last non-empty row of the table in `range`
    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KeyedTableStore + ?Sized> KeyedTableStore for std::sync::Arc<T> {
    async fn read_range(&self, range: &str) -> Result<Rows, StoreError> {
        (**self).read_range(range).await
    }

    async fn write_range(&self, range: &str, rows: Rows) -> Result<(), StoreError> {
        (**self).write_range(range, rows).await
    }

    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), StoreError> {
        (**self).append_row(range, row).await
    }
}

/// Right-pad every row with empty cells up to `width`
pub fn pad_rows(rows: Rows, width: usize) -> Rows {
    rows.into_iter()
        .map(|mut row| {
            if row.len() < width {
                row.resize(width, String::new());
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_rows_fills_ragged_rows() {
        let rows = vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["d".to_string()],
            vec![],
        ];
        let padded = pad_rows(rows, 3);
        assert!(padded.iter().all(|r| r.len() == 3));
        assert_eq!(padded[1], vec!["d", "", ""]);
    }

    #[test]
    fn test_pad_rows_keeps_long_rows() {
        let padded = pad_rows(vec![vec!["a".into(), "b".into()]], 1);
        assert_eq!(padded[0].len(), 2);
    }
}
