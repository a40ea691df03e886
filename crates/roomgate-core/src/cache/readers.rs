// ============================================================================
// Readers and Import Status sheets
// ============================================================================
// Readers: id | status | location | alarm | alarm_delay_min | alarm_status |
//          needs_update | last_checked_in
// Reader k lives on sheet row k + 2. Reader 0 is the control node.
// A reader only ever writes back its own F:H cells.
// ============================================================================

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::TableCache;
use crate::store::{pad_rows, KeyedTableStore, Rows};
use crate::types::{RoomgateError, RoomgateResult};

pub const READERS_SHEET: &str = "Readers";
pub const IMPORT_STATUS_RANGE: &str = "Import Status!A2:B2";

/// Timestamp format used in the sheet
pub const SHEET_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Remote-requested refresh flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum NeedsUpdate {
    Pending,
    Done,
    #[default]
    Clear,
}

impl NeedsUpdate {
    /// Older sheets used checkbox booleans for the flag
    pub fn from_cell(cell: &str) -> Self {
        match cell.trim().to_uppercase().as_str() {
            "PENDING" | "TRUE" => NeedsUpdate::Pending,
            "DONE" => NeedsUpdate::Done,
            _ => NeedsUpdate::Clear,
        }
    }

    pub fn as_cell(&self) -> &'static str {
        match self {
            NeedsUpdate::Pending => "PENDING",
            NeedsUpdate::Done => "DONE",
            NeedsUpdate::Clear => "",
        }
    }
}

/// One row of the Readers sheet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderConfig {
    pub id: u32,
    pub status: String,
    pub location: String,
    /// `ENABLE` / `DISABLE`, `None` when blank
    pub alarm: Option<bool>,
    pub alarm_delay_min: u32,
    pub alarm_status: String,
    pub needs_update: NeedsUpdate,
    pub last_checked_in: String,
}

impl ReaderConfig {
    pub fn decode(row: &[String]) -> Self {
        let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or("");
        Self {
            id: cell(0).parse().unwrap_or(0),
            status: cell(1).to_string(),
            location: cell(2).to_string(),
            alarm: match cell(3).to_uppercase().as_str() {
                "ENABLE" => Some(true),
                "DISABLE" => Some(false),
                _ => None,
            },
            alarm_delay_min: cell(4).parse().unwrap_or(0),
            alarm_status: cell(5).to_string(),
            needs_update: NeedsUpdate::from_cell(cell(6)),
            last_checked_in: cell(7).to_string(),
        }
    }

    pub fn alarm_enabled(&self) -> bool {
        self.alarm == Some(true)
    }

    /// Cells F:H as written back at check-in
    pub fn status_cells(&self) -> Vec<String> {
        vec![
            self.alarm_status.clone(),
            self.needs_update.as_cell().to_string(),
            self.last_checked_in.clone(),
        ]
    }
}

/// Decode the whole Readers sheet, header row excluded
pub fn decode_readers(values: Rows) -> Vec<ReaderConfig> {
    let width = values.first().map(Vec::len).unwrap_or(0);
    pad_rows(values.into_iter().skip(1).collect(), width)
        .iter()
        .map(|row| ReaderConfig::decode(row))
        .collect()
}

/// Properties a control node may change on a reader; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct ReaderProperties {
    pub location: Option<String>,
    pub alarm: Option<bool>,
    pub alarm_delay: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ImportState {
    Pending,
    Updating,
    #[default]
    Done,
}

/// Bulk import job flag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStatus {
    pub state: ImportState,
    pub last_completed: Option<NaiveDateTime>,
}

impl ImportStatus {
    pub fn decode(values: &Rows) -> Self {
        let row = values.first();
        let cell = |i: usize| {
            row.and_then(|r| r.get(i))
                .map(|c| c.trim())
                .unwrap_or("")
        };
        let state = match cell(0).to_uppercase().as_str() {
            "PENDING" => ImportState::Pending,
            "UPDATING" => ImportState::Updating,
            _ => ImportState::Done,
        };
        let last_completed = NaiveDateTime::parse_from_str(cell(1), SHEET_TIME_FORMAT).ok();
        Self {
            state,
            last_completed,
        }
    }
}

fn alarm_cell(alarm: Option<bool>) -> &'static str {
    match alarm {
        Some(true) => "ENABLE",
        Some(false) => "DISABLE",
        None => "",
    }
}

fn status_range(id: u32) -> String {
    format!("{}!F{}:H{}", READERS_SHEET, id + 2, id + 2)
}

impl<S: KeyedTableStore> TableCache<S> {
    /// Re-read the Readers sheet
    pub async fn reload_readers(&mut self) -> RoomgateResult<()> {
        let readers = decode_readers(self.fetch(READERS_SHEET).await?);
        debug!("Loaded {} readers", readers.len());
        self.readers = readers;
        Ok(())
    }

    pub fn readers(&self) -> &[ReaderConfig] {
        &self.readers
    }

    pub fn this_reader(&self) -> Option<&ReaderConfig> {
        self.readers.get(self.settings.reader_id as usize)
    }

    pub(crate) fn this_reader_mut(&mut self) -> Option<&mut ReaderConfig> {
        self.readers.get_mut(self.settings.reader_id as usize)
    }

    /// Write this reader's alarm_status, needs_update and last_checked_in
    pub async fn write_reader_status(&self) -> RoomgateResult<()> {
        let reader = self.this_reader().ok_or_else(|| {
            RoomgateError::NotFound(format!("reader {}", self.settings.reader_id))
        })?;
        self.send(&status_range(self.settings.reader_id), vec![reader.status_cells()])
            .await
    }

    /// Mark every reader except the control node as needing an update
    pub async fn request_update_all(&mut self) -> RoomgateResult<usize> {
        self.reload_readers().await?;
        let count = self.readers.len().saturating_sub(1);
        if count == 0 {
            return Ok(0);
        }

        let range = format!("{}!G3:G{}", READERS_SHEET, count + 2);
        let rows = vec![vec![NeedsUpdate::Pending.as_cell().to_string()]; count];
        self.send(&range, rows).await?;

        for reader in self.readers.iter_mut().skip(1) {
            reader.needs_update = NeedsUpdate::Pending;
        }
        info!("Requested update of {} readers", count);
        Ok(count)
    }

    /// Change a reader's properties and mark it as needing an update
    pub async fn request_update(&mut self, id: u32, props: ReaderProperties) -> RoomgateResult<()> {
        self.reload_readers().await?;
        let row = id + 2;
        let reader = self
            .readers
            .get_mut(id as usize)
            .ok_or_else(|| RoomgateError::NotFound(format!("reader {}", id)))?;

        if let Some(location) = props.location {
            reader.location = location;
        }
        if props.alarm.is_some() {
            reader.alarm = props.alarm;
        }
        if let Some(delay) = props.alarm_delay {
            reader.alarm_delay_min = delay;
        }
        reader.needs_update = NeedsUpdate::Pending;

        let properties = vec![vec![
            reader.location.clone(),
            alarm_cell(reader.alarm).to_string(),
            reader.alarm_delay_min.to_string(),
        ]];

        self.send(&format!("{}!C{}:E{}", READERS_SHEET, row, row), properties)
            .await?;
        self.send(
            &format!("{}!G{}", READERS_SHEET, row),
            vec![vec![NeedsUpdate::Pending.as_cell().to_string()]],
        )
        .await?;
        info!("Requested update of reader {}", id);
        Ok(())
    }

    /// Last reported alarm status of one reader
    pub fn alarm_status(&self, id: u32) -> Option<&str> {
        self.readers
            .get(id as usize)
            .map(|r| r.alarm_status.as_str())
    }

    pub fn alarm_statuses(&self) -> Vec<(u32, String)> {
        self.readers
            .iter()
            .enumerate()
            .map(|(i, r)| (i as u32, r.alarm_status.clone()))
            .collect()
    }

    pub async fn import_status(&mut self) -> RoomgateResult<ImportStatus> {
        let status = ImportStatus::decode(&self.fetch(IMPORT_STATUS_RANGE).await?);
        self.import_status = Some(status.clone());
        Ok(status)
    }

    /// Ask for a bulk import. Returns false when one is already running.
    pub async fn request_import(&mut self) -> RoomgateResult<bool> {
        if self.import_status().await?.state == ImportState::Updating {
            warn!("Import already in progress, not requesting another");
            return Ok(false);
        }
        self.send(
            "Import Status!A2:A2",
            vec![vec!["PENDING".to_string()]],
        )
        .await?;
        Ok(true)
    }

    /// Record the import job state. The completion time is only replaced when
    /// the job finishes with a time given.
    pub async fn set_import_status(
        &mut self,
        updating: bool,
        completed_at: Option<NaiveDateTime>,
    ) -> RoomgateResult<()> {
        let previous = self
            .import_status
            .as_ref()
            .and_then(|s| s.last_completed);
        let last_completed = match (updating, completed_at) {
            (false, Some(at)) => Some(at),
            _ => previous,
        };
        let state = if updating {
            ImportState::Updating
        } else {
            ImportState::Done
        };

        let row = vec![
            if updating { "UPDATING" } else { "DONE" }.to_string(),
            last_completed
                .map(|t| t.format(SHEET_TIME_FORMAT).to_string())
                .unwrap_or_default(),
        ];
        self.send(IMPORT_STATUS_RANGE, vec![row]).await?;
        self.import_status = Some(ImportStatus {
            state,
            last_completed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{cache_with, seeded_store};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    #[test]
    fn test_needs_update_cells() {
        assert_eq!(NeedsUpdate::from_cell("PENDING"), NeedsUpdate::Pending);
        assert_eq!(NeedsUpdate::from_cell("TRUE"), NeedsUpdate::Pending);
        assert_eq!(NeedsUpdate::from_cell("done"), NeedsUpdate::Done);
        assert_eq!(NeedsUpdate::from_cell(""), NeedsUpdate::Clear);
        assert_eq!(NeedsUpdate::from_cell("FALSE"), NeedsUpdate::Clear);
    }

    #[test]
    fn test_decode_reader_row() {
        let row: Vec<String> = ["2", "online", "Shop", "ENABLE", "5", "OK", "PENDING"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let reader = ReaderConfig::decode(&row);
        assert_eq!(reader.id, 2);
        assert!(reader.alarm_enabled());
        assert_eq!(reader.alarm_delay_min, 5);
        assert_eq!(reader.needs_update, NeedsUpdate::Pending);
        assert_eq!(reader.last_checked_in, "");
        assert_eq!(reader.status_cells(), vec!["OK", "PENDING", ""]);
    }

    #[test]
    fn test_import_status_decode() {
        let status = ImportStatus::decode(&vec![vec![
            "UPDATING".to_string(),
            "2024-03-01 04:15:00".to_string(),
        ]]);
        assert_eq!(status.state, ImportState::Updating);
        assert_eq!(
            status.last_completed,
            NaiveDate::from_ymd_opt(2024, 3, 1).and_then(|d| d.and_hms_opt(4, 15, 0))
        );
        assert_eq!(ImportStatus::decode(&Vec::new()).state, ImportState::Done);
    }

    #[tokio::test]
    async fn test_request_update_all_marks_every_reader() {
        let store = Arc::new(seeded_store());
        let mut cache = cache_with(store.clone(), 0);
        assert_eq!(cache.request_update_all().await.unwrap(), 2);
        assert_eq!(store.cell("Readers", 0, 6), "needs_update");
        assert_eq!(store.cell("Readers", 1, 6), "DONE");
        assert_eq!(store.cell("Readers", 2, 6), "PENDING");
        assert_eq!(store.cell("Readers", 3, 6), "PENDING");
    }

    #[tokio::test]
    async fn test_request_update_keeps_unset_properties() {
        let store = Arc::new(seeded_store());
        let mut cache = cache_with(store.clone(), 0);
        cache
            .request_update(
                1,
                ReaderProperties {
                    alarm_delay: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.cell("Readers", 2, 2), "Lab Door");
        assert_eq!(store.cell("Readers", 2, 3), "ENABLE");
        assert_eq!(store.cell("Readers", 2, 4), "9");
        assert_eq!(store.cell("Readers", 2, 6), "PENDING");

        assert!(matches!(
            cache.request_update(7, ReaderProperties::default()).await,
            Err(RoomgateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_flag_round() {
        let store = Arc::new(seeded_store());
        let mut cache = cache_with(store.clone(), 0);
        assert!(cache.request_import().await.unwrap());
        assert_eq!(store.cell("Import Status", 1, 0), "PENDING");

        cache.set_import_status(true, None).await.unwrap();
        assert!(!cache.request_import().await.unwrap());
        assert_eq!(store.cell("Import Status", 1, 1), "2024-01-01 04:00:00");

        let done = NaiveDate::from_ymd_opt(2024, 5, 6).and_then(|d| d.and_hms_opt(7, 8, 9));
        cache.set_import_status(false, done).await.unwrap();
        assert_eq!(store.cell("Import Status", 1, 0), "DONE");
        assert_eq!(store.cell("Import Status", 1, 1), "2024-05-06 07:08:09");
    }

    #[tokio::test]
    async fn test_alarm_statuses() {
        let store = Arc::new(MemoryStore::new().with_sheet(
            "Readers",
            vec![
                vec!["id", "status", "location", "alarm", "alarm_delay_min", "alarm_status"],
                vec!["0", "", "Office"],
                vec!["1", "", "Lab", "ENABLE", "5", "ALARM"],
            ],
        ));
        let mut cache = cache_with(store, 0);
        cache.reload_readers().await.unwrap();
        assert_eq!(cache.alarm_status(1), Some("ALARM"));
        assert_eq!(cache.alarm_status(5), None);
        assert_eq!(
            cache.alarm_statuses(),
            vec![(0, String::new()), (1, "ALARM".to_string())]
        );
    }
}
