//! ============================================================================
//! Configuration - ROOMGATE_* environment variables
//! ============================================================================
//! The binary loads `.env` first, then builds an `AppConfig` from the process
//! environment. Everything except the reader id has a default or is only
//! needed by the subcommands that use it.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::lms::LmsSettings;
use crate::store::{SheetsStore, DEFAULT_SHEETS_API};
use crate::sync::SyncSchedule;
use crate::types::RoomgateError;

const PREFIX: &str = "ROOMGATE_";

pub const DEFAULT_UPDATE_HOUR: u32 = 4;
pub const DEFAULT_CHECKIN_SECS: u64 = 30;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("ROOMGATE_{0} is not set")]
    Missing(&'static str),

    #[error("ROOMGATE_{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl From<ConfigError> for RoomgateError {
    fn from(e: ConfigError) -> Self {
        RoomgateError::Config(e.to_string())
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 0 is the control node
    pub reader_id: u32,
    pub spreadsheet_id: Option<String>,
    pub sheets_token: Option<String>,
    pub sheets_api: String,
    /// Hour of day after which the daily full sync runs
    pub update_hour: u32,
    pub checkin_secs: u64,
    pub remote_timeout_secs: u64,
    /// Append a Log row for every scan
    pub scan_logs: bool,
    pub lms_api: Option<String>,
    pub lms_token: Option<String>,
    pub lms_course_id: Option<String>,
    /// Only roster logins ending in this domain are imported
    pub login_domain: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; keys are the full `ROOMGATE_*` names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| {
            lookup(&format!("{}{}", PREFIX, var))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let reader_id = match get("READER_ID") {
            Some(v) => parse("READER_ID", v)?,
            None => return Err(ConfigError::Missing("READER_ID")),
        };

        let update_hour = match get("UPDATE_HOUR") {
            Some(v) => parse("UPDATE_HOUR", v)?,
            None => DEFAULT_UPDATE_HOUR,
        };
        if update_hour > 23 {
            return Err(ConfigError::Invalid {
                var: "UPDATE_HOUR",
                value: update_hour.to_string(),
            });
        }

        Ok(Self {
            reader_id,
            spreadsheet_id: get("SPREADSHEET_ID"),
            sheets_token: get("SHEETS_TOKEN"),
            sheets_api: get("SHEETS_API").unwrap_or_else(|| DEFAULT_SHEETS_API.to_string()),
            update_hour,
            checkin_secs: get("CHECKIN_SECS")
                .map(|v| parse("CHECKIN_SECS", v))
                .transpose()?
                .unwrap_or(DEFAULT_CHECKIN_SECS),
            remote_timeout_secs: get("REMOTE_TIMEOUT_SECS")
                .map(|v| parse("REMOTE_TIMEOUT_SECS", v))
                .transpose()?
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
            scan_logs: get("SCAN_LOGS")
                .map(|v| parse_flag("SCAN_LOGS", v))
                .transpose()?
                .unwrap_or(false),
            lms_api: get("LMS_API"),
            lms_token: get("LMS_TOKEN"),
            lms_course_id: get("LMS_COURSE_ID"),
            login_domain: get("LOGIN_DOMAIN"),
        })
    }

    pub fn is_control(&self) -> bool {
        self.reader_id == 0
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            reader_id: self.reader_id,
            remote_timeout: Duration::from_secs(self.remote_timeout_secs),
        }
    }

    pub fn sync_schedule(&self) -> SyncSchedule {
        SyncSchedule {
            update_hour: self.update_hour,
            checkin_interval: Duration::from_secs(self.checkin_secs),
        }
    }

    pub fn sheets_store(&self) -> Result<SheetsStore, ConfigError> {
        let spreadsheet_id = self
            .spreadsheet_id
            .as_deref()
            .ok_or(ConfigError::Missing("SPREADSHEET_ID"))?;
        let token = self
            .sheets_token
            .as_deref()
            .ok_or(ConfigError::Missing("SHEETS_TOKEN"))?;
        Ok(SheetsStore::new(
            &self.sheets_api,
            spreadsheet_id,
            token,
            Duration::from_secs(self.remote_timeout_secs),
        ))
    }

    pub fn lms_settings(&self) -> Result<LmsSettings, ConfigError> {
        Ok(LmsSettings {
            api_base: self.lms_api.clone().ok_or(ConfigError::Missing("LMS_API"))?,
            token: self.lms_token.clone().ok_or(ConfigError::Missing("LMS_TOKEN"))?,
            course_id: self
                .lms_course_id
                .clone()
                .ok_or(ConfigError::Missing("LMS_COURSE_ID"))?,
            login_domain: self.login_domain.clone(),
            timeout: Duration::from_secs(self.remote_timeout_secs),
        })
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}
