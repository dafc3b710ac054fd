//! Error types for the virtual switch
//!
//! Validation failures are reported to whoever submitted the request and never
//! mutate state. Persistence failures are always logged and swallowed by the
//! callers.

use thiserror::Error;

/// A rejected inbound request (bus message, data-model write, manual PUT)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request body is missing or is not a JSON object")]
    MissingBody,

    #[error("expected PGN {expected}, got {actual}")]
    UnexpectedPgn { expected: u32, actual: i64 },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("instance {actual} does not match the virtual instance {expected}")]
    InstanceMismatch { expected: u8, actual: i64 },

    #[error("no channel field (Switch1..Switch28) present")]
    NoChannelField,

    #[error("more than one channel field present: {0}")]
    MultipleChannelFields(String),

    #[error("channel {0} is outside the range 1-28")]
    ChannelOutOfRange(i64),

    #[error("value {0} cannot be interpreted as on/off")]
    InvalidValue(String),

    #[error("path '{0}' is not a switch state path")]
    InvalidPath(String),

    #[error("label '{0}' matches more than one channel")]
    AmbiguousLabel(String),

    #[error("'{0}' is neither a channel label nor a channel number")]
    UnknownLabel(String),
}

/// Errors returned by the state engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("channel {0} is not enabled on this switch bank")]
    UnknownChannel(u8),

    #[error("state engine is not running")]
    Closed,
}

/// Errors from reading or writing the power-down snapshot
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
