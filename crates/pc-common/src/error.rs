//! Error types for the parental-control engine

use thiserror::Error;

/// Parental-control error type
#[derive(Error, Debug)]
pub enum PcError {
    /// Malformed feature line, feature string or command field
    #[error("parse error: {0}")]
    Parse(String),

    /// Rule or group id lookup miss
    #[error("{kind} not found: {id}")]
    NotFound {
        /// "rule" or "group"
        kind: &'static str,
        /// Requested id
        id: String,
    },

    /// Rule deletion refused while groups are bound to it
    #[error("rule {id} is referenced by {count} group(s)")]
    Referenced {
        /// Rule id
        id: String,
        /// Current reference count
        count: u32,
    },

    /// Command missing a required field or carrying an invalid value
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Command code outside the known set
    #[error("unknown command code {0}")]
    UnknownCommand(u32),

    /// Storage for an add/update could not be reserved
    #[error("allocation failed: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PcError {
    /// Rule id lookup miss
    pub fn rule_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "rule", id: id.into() }
    }

    /// Group id lookup miss
    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "group", id: id.into() }
    }
}

/// Result type for the parental-control engine
pub type PcResult<T> = Result<T, PcError>;
