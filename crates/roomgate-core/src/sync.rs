//! ============================================================================
//! Sync Schedule - when to refresh and when to check in
//! ============================================================================
//! A reader does one full refresh per calendar day once the update hour has
//! passed, an immediate refresh when the control node flags it, and a
//! heartbeat check-in every interval otherwise.
//! ============================================================================

use chrono::{DateTime, Local, Timelike};
use serde::Serialize;
use std::time::Duration;

use crate::config::{DEFAULT_CHECKIN_SECS, DEFAULT_UPDATE_HOUR};
use crate::types::AlarmSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSchedule {
    pub update_hour: u32,
    pub checkin_interval: Duration,
}

impl Default for SyncSchedule {
    fn default() -> Self {
        Self {
            update_hour: DEFAULT_UPDATE_HOUR,
            checkin_interval: Duration::from_secs(DEFAULT_CHECKIN_SECS),
        }
    }
}

/// Timestamps of the last successful sync operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub last_full_sync: Option<DateTime<Local>>,
    pub last_heartbeat: Option<DateTime<Local>>,
    /// Set when a sync fails, cleared by the next successful one
    pub last_failed_sync: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    FullSync,
    Heartbeat,
    Idle,
}

impl SyncSchedule {
    /// Decide what the loop should do at `now`
    pub fn due(&self, state: &SyncState, update_requested: bool, now: DateTime<Local>) -> SyncAction {
        // a failed sync is retried one interval later, whatever is due
        if state
            .last_failed_sync
            .is_some_and(|failed| !self.interval_passed(failed, now))
        {
            return SyncAction::Idle;
        }
        if update_requested {
            return SyncAction::FullSync;
        }

        let stale = match state.last_full_sync {
            None => true,
            Some(last) => now.date_naive() > last.date_naive(),
        };
        if stale && now.hour() >= self.update_hour {
            return SyncAction::FullSync;
        }

        let heartbeat_due = match state.last_heartbeat {
            None => true,
            Some(last) => self.interval_passed(last, now),
        };
        if heartbeat_due {
            SyncAction::Heartbeat
        } else {
            SyncAction::Idle
        }
    }

    fn interval_passed(&self, since: DateTime<Local>, now: DateTime<Local>) -> bool {
        (now - since)
            .to_std()
            .map(|elapsed| elapsed >= self.checkin_interval)
            .unwrap_or(false)
    }
}

/// Value written to the reader's alarm_status cell. Only an explicit
/// `ENABLE` (`Some(true)`) counts as enabled.
pub fn alarm_status_label(alarm: Option<bool>, is_control: bool, signal: AlarmSignal) -> &'static str {
    if alarm != Some(true) {
        return "DISABLED";
    }
    if is_control {
        return "";
    }
    match signal {
        AlarmSignal::TaggedOut => "TAGGED OUT",
        AlarmSignal::Triggered => "ALARM",
        AlarmSignal::Quiet => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, day, hour, min, sec)
            .single()
            .unwrap()
    }

    #[test]
    fn test_first_sync_waits_for_update_hour() {
        let schedule = SyncSchedule::default();
        let state = SyncState::default();
        assert_eq!(schedule.due(&state, false, at(4, 3, 59, 0)), SyncAction::Heartbeat);
        assert_eq!(schedule.due(&state, false, at(4, 4, 0, 0)), SyncAction::FullSync);
    }

    #[test]
    fn test_one_full_sync_per_day() {
        let schedule = SyncSchedule::default();
        let state = SyncState {
            last_full_sync: Some(at(4, 4, 0, 5)),
            last_heartbeat: Some(at(4, 12, 0, 0)),
            ..SyncState::default()
        };
        assert_eq!(schedule.due(&state, false, at(4, 23, 0, 0)), SyncAction::Heartbeat);
        assert_eq!(schedule.due(&state, false, at(5, 2, 0, 0)), SyncAction::Heartbeat);
        assert_eq!(schedule.due(&state, false, at(5, 4, 1, 0)), SyncAction::FullSync);
    }

    #[test]
    fn test_heartbeat_interval() {
        let schedule = SyncSchedule::default();
        let state = SyncState {
            last_full_sync: Some(at(4, 5, 0, 0)),
            last_heartbeat: Some(at(4, 12, 0, 0)),
            ..SyncState::default()
        };
        assert_eq!(schedule.due(&state, false, at(4, 12, 0, 29)), SyncAction::Idle);
        assert_eq!(schedule.due(&state, false, at(4, 12, 0, 30)), SyncAction::Heartbeat);
    }

    #[test]
    fn test_update_request_forces_full_sync() {
        let schedule = SyncSchedule::default();
        let state = SyncState {
            last_full_sync: Some(at(4, 5, 0, 0)),
            last_heartbeat: Some(at(4, 12, 0, 0)),
            ..SyncState::default()
        };
        assert_eq!(schedule.due(&state, true, at(4, 12, 0, 1)), SyncAction::FullSync);
    }

    #[test]
    fn test_alarm_status_label() {
        assert_eq!(alarm_status_label(Some(false), false, AlarmSignal::Triggered), "DISABLED");
        assert_eq!(alarm_status_label(Some(false), true, AlarmSignal::Quiet), "DISABLED");
        assert_eq!(alarm_status_label(Some(true), true, AlarmSignal::Triggered), "");
        assert_eq!(alarm_status_label(Some(true), false, AlarmSignal::TaggedOut), "TAGGED OUT");
        assert_eq!(alarm_status_label(Some(true), false, AlarmSignal::Triggered), "ALARM");
        assert_eq!(alarm_status_label(Some(true), false, AlarmSignal::Quiet), "OK");
    }

    #[test]
    fn test_blank_alarm_cell_is_disabled() {
        assert_eq!(alarm_status_label(None, false, AlarmSignal::Quiet), "DISABLED");
        assert_eq!(alarm_status_label(None, false, AlarmSignal::Triggered), "DISABLED");
        assert_eq!(alarm_status_label(None, true, AlarmSignal::Quiet), "DISABLED");
    }

    #[test]
    fn test_failed_sync_waits_one_interval() {
        let schedule = SyncSchedule::default();
        let state = SyncState {
            last_full_sync: Some(at(4, 5, 0, 0)),
            last_heartbeat: Some(at(4, 11, 0, 0)),
            last_failed_sync: Some(at(4, 12, 0, 0)),
        };
        assert_eq!(schedule.due(&state, false, at(4, 12, 0, 10)), SyncAction::Idle);
        assert_eq!(schedule.due(&state, true, at(4, 12, 0, 10)), SyncAction::Idle);
        assert_eq!(schedule.due(&state, false, at(4, 12, 0, 30)), SyncAction::Heartbeat);
        assert_eq!(schedule.due(&state, true, at(4, 12, 0, 30)), SyncAction::FullSync);
    }
}
