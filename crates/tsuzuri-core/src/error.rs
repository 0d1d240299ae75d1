//! Core error types for tsuzuri-core.
//!
//! This module defines the error hierarchy using thiserror. Each concern
//! gets its own enum; `CoreError` is the umbrella the library surfaces
//! at its boundaries.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for tsuzuri-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// State-store errors (lock/connection failures, bad rows)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors (malformed settings input)
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Device registration errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Push delivery errors
    #[error("Push error: {0}")]
    Push(#[from] PushError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// State-store errors.
///
/// A continuity mutation that hits one of these is abandoned for the
/// current invocation and picked up again by the next natural trigger;
/// it is never partially applied (the row transaction rolls back).
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored row could not be decoded back into its domain type
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),
}

/// Validation errors.
///
/// Malformed settings are rejected here before they reach the targeting
/// or continuity code.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Value outside its permitted range
    #[error("Value for '{field}' out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

impl ValidationError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Device registration errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The endpoint is already registered (conflict, surfaced to the
    /// caller and never retried)
    #[error("Device endpoint already registered")]
    DuplicateEndpoint,

    /// Underlying store failure
    #[error("Device store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Push delivery errors, split by how the fan-out reacts.
#[derive(Error, Debug)]
pub enum PushError {
    /// Permanent failure: the push service reported the subscription
    /// dead (HTTP 410). The registration must be deleted.
    #[error("Subscription gone (HTTP {status}): {endpoint}")]
    Gone { status: u16, endpoint: String },

    /// The push service rejected the message for a transient reason;
    /// the registration is kept.
    #[error("Push rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request never produced an HTTP status (connect failure,
    /// encryption failure, malformed key material).
    #[error("Push transport failure: {0}")]
    Transport(String),
}

impl PushError {
    /// Whether the failure invalidates the device registration.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::Gone { .. })
    }
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(DatabaseError::from(err))
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
