//! ============================================================================
//! Core Types for Roomgate
//! ============================================================================
//! Shared data structures for people, room access states, reader grants and
//! write outcomes, plus the error taxonomy used by every component.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::access::ExprError;
use crate::store::StoreError;

/// Role of a person row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Staff,
}

/// Key used to address a person: either their login-style identity or a card token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonKey<'a> {
    Identity(&'a str),
    Card(&'a str),
}

impl fmt::Display for PersonKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonKey::Identity(id) => write!(f, "identity {}", id),
            PersonKey::Card(token) => write!(f, "card {}", token),
        }
    }
}

/// Room-scoped access flag as stored in a student's room column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    #[default]
    NoAccess,
    Access,
    /// Manually pinned, evaluation never overwrites it
    OverrideNoAccess,
    /// Manually pinned, evaluation never overwrites it
    OverrideAccess,
}

impl AccessState {
    /// Parse a sheet cell. Empty cells mean no access.
    pub fn from_cell(cell: &str) -> Option<Self> {
        match cell.trim().to_lowercase().as_str() {
            "" | "no access" => Some(AccessState::NoAccess),
            "access" => Some(AccessState::Access),
            "override no access" => Some(AccessState::OverrideNoAccess),
            "override access" => Some(AccessState::OverrideAccess),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> &'static str {
        match self {
            AccessState::NoAccess => "No Access",
            AccessState::Access => "Access",
            AccessState::OverrideNoAccess => "Override No Access",
            AccessState::OverrideAccess => "Override Access",
        }
    }

    pub fn from_granted(granted: bool) -> Self {
        if granted {
            AccessState::Access
        } else {
            AccessState::NoAccess
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, AccessState::Access | AccessState::OverrideAccess)
    }

    pub fn is_override(&self) -> bool {
        matches!(
            self,
            AccessState::OverrideAccess | AccessState::OverrideNoAccess
        )
    }
}

/// An RGB color as written in the grants sheet (`RRGGBB`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const ALERT_RED: Color = Color { r: 255, g: 0, b: 0 };

    pub const fn gray(level: u8) -> Self {
        Color {
            r: level,
            g: level,
            b: level,
        }
    }

    /// Parse a six digit hex string, with or without a leading `#`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex())
    }
}

/// Color and alarm delay a reader shows for a room or classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub color: Color,
    /// Alarm delay in minutes, absent when the cell leaves it blank
    pub alarm_delay: Option<u32>,
}

impl Grant {
    pub fn new(color: Color, alarm_delay: Option<u32>) -> Self {
        Self { color, alarm_delay }
    }
}

/// Alarm input reported by the reader at check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSignal {
    #[default]
    Quiet,
    Triggered,
    TaggedOut,
}

/// Result of a cache write. Writes never fail with an error: they either
/// happen or report why they were refused.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T = ()> {
    /// The write happened; carries the effective value
    Written(T),
    /// Uniqueness or range violation, nothing was changed
    Conflict,
    /// Unknown person or room
    NotFound,
    /// The snapshot was loaded in limited mode and lacks the needed columns
    Disabled,
}

impl<T> Outcome<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, Outcome::Written(_))
    }

    pub fn written(self) -> Option<T> {
        match self {
            Outcome::Written(value) => Some(value),
            _ => None,
        }
    }
}

/// Error types for roomgate
#[derive(Debug, thiserror::Error)]
pub enum RoomgateError {
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Data conflict: {0}")]
    DataConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed expression for room '{room}': {source}")]
    MalformedExpression {
        room: String,
        #[source]
        source: ExprError,
    },

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for RoomgateError {
    fn from(e: StoreError) -> Self {
        RoomgateError::RemoteUnavailable(e.to_string())
    }
}

pub type RoomgateResult<T> = Result<T, RoomgateError>;
