//! ============================================================================
//! Reader Session - everything one reader process owns
//! ============================================================================
//! The session holds the table cache, the sync timestamps, the reader's alarm
//! input and the scan-logging switch. The scan loop drives it; nothing else
//! keeps state between iterations.
//! ============================================================================

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::access::{resolve, Resolved};
use crate::cache::{LoadMode, NeedsUpdate, TableCache, SHEET_TIME_FORMAT};
use crate::store::KeyedTableStore;
use crate::sync::{alarm_status_label, SyncAction, SyncSchedule, SyncState};
use crate::types::{AlarmSignal, RoomgateError, RoomgateResult};

pub struct ReaderSession<S> {
    cache: TableCache<S>,
    schedule: SyncSchedule,
    state: SyncState,
    mode: LoadMode,
    alarm: AlarmSignal,
    scan_logs: bool,
}

impl<S: KeyedTableStore> ReaderSession<S> {
    pub fn new(cache: TableCache<S>, schedule: SyncSchedule, scan_logs: bool) -> Self {
        Self {
            cache,
            schedule,
            state: SyncState::default(),
            mode: LoadMode::Limited,
            alarm: AlarmSignal::default(),
            scan_logs,
        }
    }

    pub fn cache(&self) -> &TableCache<S> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TableCache<S> {
        &mut self.cache
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn alarm(&self) -> AlarmSignal {
        self.alarm
    }

    pub fn set_alarm(&mut self, signal: AlarmSignal) {
        self.alarm = signal;
    }

    fn reader_id(&self) -> u32 {
        self.cache.settings().reader_id
    }

    /// Initial load and check-in. `mode` is kept for every later refresh.
    pub async fn start(&mut self, mode: LoadMode) -> RoomgateResult<()> {
        info!("Starting reader {} ({:?})", self.reader_id(), mode);
        self.mode = mode;
        self.refresh_at(Local::now()).await
    }

    async fn load(&mut self, now: DateTime<Local>) -> RoomgateResult<()> {
        self.cache.load(self.mode).await?;
        self.state.last_full_sync = Some(now);
        Ok(())
    }

    /// Report status to the Readers sheet, reloading first if the control
    /// node asked for it. Returns the alarm status written.
    pub async fn check_in(&mut self) -> RoomgateResult<String> {
        self.check_in_at(Local::now()).await
    }

    async fn check_in_at(&mut self, now: DateTime<Local>) -> RoomgateResult<String> {
        self.cache.reload_readers().await?;
        self.report_status(true, now).await
    }

    /// Write this reader's status cells. `reload_if_pending` is false right
    /// after a full load, which has already picked up the requested update.
    async fn report_status(
        &mut self,
        reload_if_pending: bool,
        now: DateTime<Local>,
    ) -> RoomgateResult<String> {
        let pending = self
            .cache
            .this_reader()
            .map(|r| r.needs_update == NeedsUpdate::Pending)
            .ok_or_else(|| RoomgateError::NotFound(format!("reader {}", self.reader_id())))?;
        if pending && reload_if_pending {
            info!("Update requested by control node, reloading");
            self.load(now).await?;
        }

        let is_control = self.reader_id() == 0;
        let signal = self.alarm;
        let reader = self
            .cache
            .this_reader_mut()
            .ok_or_else(|| RoomgateError::NotFound("reader row vanished on reload".into()))?;
        let status = alarm_status_label(reader.alarm, is_control, signal).to_string();
        reader.alarm_status = status.clone();
        reader.last_checked_in = now.format(SHEET_TIME_FORMAT).to_string();
        reader.needs_update = NeedsUpdate::Done;

        self.cache.write_reader_status().await?;
        self.state.last_heartbeat = Some(now);
        debug!("Checked in: alarm status '{}'", status);
        Ok(status)
    }

    /// Reload every table, then check in
    pub async fn refresh(&mut self) -> RoomgateResult<()> {
        self.refresh_at(Local::now()).await
    }

    async fn refresh_at(&mut self, now: DateTime<Local>) -> RoomgateResult<()> {
        self.load(now).await?;
        self.report_status(false, now).await?;
        Ok(())
    }

    /// Run whatever the schedule says is due at `now`. A failure is
    /// remembered so the next attempt waits one check-in interval.
    pub async fn sync_if_due(&mut self, now: DateTime<Local>) -> RoomgateResult<SyncAction> {
        let requested = self
            .cache
            .this_reader()
            .is_some_and(|r| r.needs_update == NeedsUpdate::Pending);
        let action = self.schedule.due(&self.state, requested, now);
        let result = match action {
            SyncAction::FullSync => {
                info!("Refreshing tables");
                self.refresh_at(now).await
            }
            SyncAction::Heartbeat => self.check_in_at(now).await.map(|_| ()),
            SyncAction::Idle => return Ok(action),
        };

        match result {
            Ok(()) => {
                self.state.last_failed_sync = None;
                Ok(action)
            }
            Err(e) => {
                self.state.last_failed_sync = Some(now);
                Err(e)
            }
        }
    }

    /// Resolve a scanned token, appending an audit row when scan logging is on
    pub async fn resolve(&self, token: &str) -> Resolved {
        let resolved = resolve(self.cache.people(), self.cache.grants(), token);
        debug!("Resolved {} -> {}", token, resolved.audit_label());

        if self.scan_logs {
            let row = self.audit_row(token, &resolved);
            if let Err(e) = self.cache.append_log(row).await {
                warn!("Failed to log scan of {}: {}", token, e);
            }
        }
        resolved
    }

    fn audit_row(&self, token: &str, resolved: &Resolved) -> Vec<String> {
        let location = self
            .cache
            .this_reader()
            .map(|r| r.location.clone())
            .unwrap_or_default();
        let delay = resolved
            .grant()
            .and_then(|g| g.alarm_delay)
            .map(|d| d.to_string())
            .unwrap_or_default();
        vec![
            Local::now().format(SHEET_TIME_FORMAT).to_string(),
            token.to_string(),
            self.reader_id().to_string(),
            location,
            String::new(),
            String::new(),
            String::new(),
            resolved.audit_label(),
            if self.alarm == AlarmSignal::Triggered {
                "Triggered"
            } else {
                "Not Triggered"
            }
            .to_string(),
            delay,
        ]
    }
}
