//! ============================================================================
//! Remote Table Cache - typed snapshots of the remote sheets
//! ============================================================================
//! Holds the decoded People, Modules, Accesses and Readers tables for one
//! reader. Loads are all-or-nothing: every table is fetched and decoded into
//! locals and only committed once all of them succeeded, so a failed refresh
//! leaves the previous snapshot untouched.
//!
//! ## Load modes
//! - **Full**: whole Students and Staff sheets, every mutation available
//! - **Limited**: only card tokens and access columns, identity writes disabled
//! ============================================================================

mod grants;
mod people;
mod readers;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use grants::{parse_grant_cell, ReaderGrants};
pub use people::{derive_rooms, NewPerson, People, Person, STAFF_COLUMNS, STUDENT_COLUMNS};
pub use readers::{
    decode_readers, ImportState, ImportStatus, NeedsUpdate, ReaderConfig, ReaderProperties,
    IMPORT_STATUS_RANGE, READERS_SHEET, SHEET_TIME_FORMAT,
};

use crate::access::ModuleRule;
use crate::store::{column_letters, KeyedTableStore, Rows, StoreError, SEND_BLOCK};
use crate::types::{Role, RoomgateError, RoomgateResult};

pub const STUDENTS_SHEET: &str = "Students";
pub const STAFF_SHEET: &str = "Staff";
pub const MODULES_SHEET: &str = "Modules";
pub const LOG_SHEET: &str = "Log";

/// Which People columns a load fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    Full,
    Limited,
}

impl LoadMode {
    fn people_ranges(&self) -> (&'static str, &'static str) {
        match self {
            LoadMode::Full => (STUDENTS_SHEET, STAFF_SHEET),
            LoadMode::Limited => ("Students!E1:ZZ", "Staff!A1:A"),
        }
    }
}

/// Settings the cache needs from configuration
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// 0 is the control node, which has no grants row
    pub reader_id: u32,
    /// Bound on every remote call
    pub remote_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            reader_id: 0,
            remote_timeout: Duration::from_secs(20),
        }
    }
}

/// Owner of every decoded table
pub struct TableCache<S> {
    store: S,
    settings: CacheSettings,
    people: People,
    rules: Vec<ModuleRule>,
    grants: Option<ReaderGrants>,
    readers: Vec<ReaderConfig>,
    import_status: Option<ImportStatus>,
    loaded_at: Option<DateTime<Local>>,
}

impl<S: KeyedTableStore> TableCache<S> {
    pub fn new(store: S, settings: CacheSettings) -> Self {
        Self {
            store,
            settings,
            people: People::empty(LoadMode::Limited),
            rules: Vec::new(),
            grants: None,
            readers: Vec::new(),
            import_status: None,
            loaded_at: None,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn people(&self) -> &People {
        &self.people
    }

    pub fn people_mut(&mut self) -> &mut People {
        &mut self.people
    }

    pub fn rules(&self) -> &[ModuleRule] {
        &self.rules
    }

    pub fn grants(&self) -> Option<&ReaderGrants> {
        self.grants.as_ref()
    }

    pub fn mode(&self) -> LoadMode {
        self.people.mode()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Local>> {
        self.loaded_at
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }

    /// Fetch every table and replace the snapshot in one step
    pub async fn load(&mut self, mode: LoadMode) -> RoomgateResult<()> {
        debug!("Loading tables ({:?})", mode);

        let (students_range, staff_range) = mode.people_ranges();
        let students = self.fetch(students_range).await?;
        let staff = self.fetch(staff_range).await?;
        let people = People::decode(mode, students, staff)?;

        let rules = ModuleRule::decode_sheet(self.fetch(MODULES_SHEET).await?)?;

        let grants = if self.settings.reader_id > 0 {
            let range = ReaderGrants::range(self.settings.reader_id, people.rooms());
            let rows = self.fetch(&range).await?;
            let row = rows.into_iter().next().unwrap_or_default();
            if row.is_empty() {
                warn!(
                    "No grants row for reader {}, every scan will be refused",
                    self.settings.reader_id
                );
            }
            Some(ReaderGrants::decode(&row, people.rooms()))
        } else {
            None
        };

        let readers = decode_readers(self.fetch(READERS_SHEET).await?);

        if self.is_loaded() {
            log_room_drift(self.people.rooms(), people.rooms());
        }

        info!(
            "Loaded {} students, {} staff, {} rooms, {} rules",
            people.students().len(),
            people.staff().len(),
            people.rooms().len(),
            rules.len()
        );

        self.people = people;
        self.rules = rules;
        self.grants = grants;
        self.readers = readers;
        self.loaded_at = Some(Local::now());
        Ok(())
    }

    pub async fn flush_students(&mut self) -> RoomgateResult<()> {
        self.flush(Role::Student).await
    }

    pub async fn flush_staff(&mut self) -> RoomgateResult<()> {
        self.flush(Role::Staff).await
    }

    /// Write a roster back sorted by last name. Rows left over from a longer
    /// previous read are blanked.
    async fn flush(&mut self, role: Role) -> RoomgateResult<()> {
        let sheet = match role {
            Role::Student => STUDENTS_SHEET,
            Role::Staff => STAFF_SHEET,
        };
        let Some((mut rows, read_len)) = self.people.prepare_flush(role) else {
            return Err(RoomgateError::DataConflict(format!(
                "{} cannot be written from a limited snapshot",
                sheet
            )));
        };

        let written_len = rows.len();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        if rows.len() < read_len {
            rows.resize(read_len, vec![String::new(); width]);
        }
        let last_col = column_letters(width - 1);

        for (block, chunk) in rows.chunks(SEND_BLOCK).enumerate() {
            let start = block * SEND_BLOCK + 1;
            let end = start + chunk.len() - 1;
            let range = format!("{}!A{}:{}{}", sheet, start, last_col, end);
            self.send(&range, chunk.to_vec()).await?;
        }

        debug!(
            "Flushed {} ({} rows, {} blanked)",
            sheet,
            written_len,
            read_len.saturating_sub(written_len)
        );
        self.people.mark_flushed(role, written_len);
        Ok(())
    }

    /// Append one row to the Log sheet
    pub async fn append_log(&self, row: Vec<String>) -> RoomgateResult<()> {
        let timeout = self.settings.remote_timeout;
        bounded(LOG_SHEET, timeout, self.store.append_row(LOG_SHEET, row)).await
    }

    pub(crate) async fn fetch(&self, range: &str) -> RoomgateResult<Rows> {
        let timeout = self.settings.remote_timeout;
        bounded(range, timeout, self.store.read_range(range)).await
    }

    pub(crate) async fn send(&self, range: &str, rows: Rows) -> RoomgateResult<()> {
        let timeout = self.settings.remote_timeout;
        bounded(range, timeout, self.store.write_range(range, rows)).await
    }
}

/// Run a store call under the client-side timeout
async fn bounded<T>(
    range: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> RoomgateResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| {
            warn!("Remote call on {} failed: {}", range, e);
            RoomgateError::from(e)
        }),
        Err(_) => {
            warn!("Remote call on {} timed out after {:?}", range, timeout);
            Err(RoomgateError::RemoteUnavailable(format!(
                "{} timed out after {:?}",
                range, timeout
            )))
        }
    }
}

fn log_room_drift(before: &[String], after: &[String]) {
    let before: BTreeSet<&String> = before.iter().collect();
    let after: BTreeSet<&String> = after.iter().collect();
    let added: Vec<_> = after.difference(&before).collect();
    let removed: Vec<_> = before.difference(&after).collect();
    if !added.is_empty() || !removed.is_empty() {
        warn!(
            "Room set changed since last load: added {:?}, removed {:?}",
            added, removed
        );
    }
}
