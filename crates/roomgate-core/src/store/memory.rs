// ============================================================================
// MemoryStore - in-process sheets with the remote range contract
// ============================================================================
// Used by tests and offline bench runs. Reads trim trailing empty cells and
// rows the way the remote API does, so ragged data reaches the cache exactly
// as it would in production.
// ============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use super::range::CellRange;
use super::{KeyedTableStore, Rows, StoreError};

/// In-memory keyed table store
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: RwLock<HashMap<String, Rows>>,
    failing: RwLock<HashSet<String>>,
    writes: RwLock<Vec<String>>,
    reads: RwLock<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style sheet seeding
    pub fn with_sheet(self, name: &str, rows: Vec<Vec<&str>>) -> Self {
        self.set_sheet(name, rows);
        self
    }

    pub fn set_sheet(&self, name: &str, rows: Vec<Vec<&str>>) {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(str::to_string).collect())
            .collect();
        self.sheets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), rows);
    }

    /// Full raw contents of a sheet (empty if missing)
    pub fn sheet(&self, name: &str) -> Rows {
        self.sheets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Single cell, empty string when outside the stored data
    pub fn cell(&self, name: &str, row: usize, col: usize) -> String {
        self.sheet(name)
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default()
    }

    /// Make every call touching `sheet` fail with a transport error
    pub fn fail_sheet(&self, sheet: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sheet.to_string());
    }

    pub fn heal_sheet(&self, sheet: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(sheet);
    }

    /// Ranges of every write and append call, in order
    pub fn write_log(&self) -> Vec<String> {
        self.writes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ranges of every read call, failed ones included, in order
    pub fn read_log(&self) -> Vec<String> {
        self.reads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self, range: &CellRange) -> Result<(), StoreError> {
        let failing = self.failing.read().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&range.sheet) {
            return Err(StoreError::Transport(format!(
                "sheet '{}' unreachable",
                range.sheet
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyedTableStore for MemoryStore {
    async fn read_range(&self, range: &str) -> Result<Rows, StoreError> {
        let parsed = CellRange::parse(range)?;
        self.reads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(range.to_string());
        self.check(&parsed)?;

        let sheets = self.sheets.read().unwrap_or_else(PoisonError::into_inner);
        let data = sheets
            .get(&parsed.sheet)
            .ok_or_else(|| StoreError::InvalidRange(range.to_string()))?;

        let last_row = parsed
            .end_row
            .map(|r| r + 1)
            .unwrap_or(data.len())
            .min(data.len());

        let mut rows: Rows = data
            .get(parsed.start_row..last_row)
            .unwrap_or_default()
            .iter()
            .map(|row| {
                let end = parsed.end_col.map(|c| c + 1).unwrap_or(row.len()).min(row.len());
                let mut cells: Vec<String> =
                    row.get(parsed.start_col..end).unwrap_or_default().to_vec();
                while cells.last().is_some_and(|c| c.is_empty()) {
                    cells.pop();
                }
                cells
            })
            .collect();

        while rows.last().is_some_and(|r| r.is_empty()) {
            rows.pop();
        }

        debug!("MemoryStore read {} -> {} rows", range, rows.len());
        Ok(rows)
    }

    async fn write_range(&self, range: &str, rows: Rows) -> Result<(), StoreError> {
        let parsed = CellRange::parse(range)?;
        self.check(&parsed)?;

        if let Some(end_row) = parsed.end_row {
            if rows.len() > end_row - parsed.start_row + 1 {
                return Err(StoreError::InvalidRange(format!(
                    "{} rows do not fit {}",
                    rows.len(),
                    range
                )));
            }
        }
        if let Some(end_col) = parsed.end_col {
            let width = end_col - parsed.start_col + 1;
            if rows.iter().any(|r| r.len() > width) {
                return Err(StoreError::InvalidRange(format!(
                    "row wider than {} columns in {}",
                    width, range
                )));
            }
        }

        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);
        let data = sheets.entry(parsed.sheet.clone()).or_default();
        for (offset, row) in rows.into_iter().enumerate() {
            let r = parsed.start_row + offset;
            if data.len() <= r {
                data.resize(r + 1, Vec::new());
            }
            let target = &mut data[r];
            for (c_offset, value) in row.into_iter().enumerate() {
                let c = parsed.start_col + c_offset;
                if target.len() <= c {
                    target.resize(c + 1, String::new());
                }
                target[c] = value;
            }
        }
        drop(sheets);

        self.writes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(range.to_string());
        Ok(())
    }

    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), StoreError> {
        let parsed = CellRange::parse(range)?;
        self.check(&parsed)?;

        let mut sheets = self.sheets.write().unwrap_or_else(PoisonError::into_inner);
        let data = sheets.entry(parsed.sheet.clone()).or_default();
        let next = data
            .iter()
            .rposition(|r| r.iter().any(|c| !c.is_empty()))
            .map(|i| i + 1)
            .unwrap_or(0);
        if data.len() <= next {
            data.resize(next + 1, Vec::new());
        }
        let mut padded = vec![String::new(); parsed.start_col];
        padded.extend(row);
        data[next] = padded;
        drop(sheets);

        self.writes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(range.to_string());
        Ok(())
    }
}
