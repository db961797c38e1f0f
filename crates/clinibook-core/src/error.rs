//! Core error types for clinibook-core.
//!
//! The taxonomy distinguishes caller bugs (`InvalidRequest`,
//! `InvalidTransition`) from user-facing policy rejections (`Rule`,
//! `SlotUnavailable`) and from store failures (`Persistence`), so callers
//! can decide between "pick another time", "try again later" and "file a
//! bug" without string matching.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::AppointmentStatus;

/// Top-level error for every booking operation.
#[derive(Error, Debug)]
pub enum BookingError {
    /// Malformed input. A caller bug; retrying the same request is pointless.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Business-policy rejection, with the specific reason attached.
    #[error("booking rule violated: {0}")]
    Rule(#[from] RuleViolation),

    /// The slot was taken between the availability read and the commit, or
    /// the schedule changed. Callers should re-fetch availability.
    #[error("slot starting at {start} is no longer available for provider {provider_id}")]
    SlotUnavailable {
        provider_id: Uuid,
        start: DateTime<Utc>,
    },

    /// State-machine misuse: the event is not legal from the current status.
    #[error("event '{event}' is not allowed from status '{from}'")]
    InvalidTransition {
        from: AppointmentStatus,
        event: &'static str,
    },

    /// No appointment with the given id.
    #[error("appointment {0} not found")]
    NotFound(Uuid),

    /// Provider/patient directory failures.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Store unavailable or a constraint failure that is not a legitimate
    /// slot conflict. May be retried with backoff at the caller's discretion.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Specific business-rule rejections surfaced to the end user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    #[error("requested start {start} is not in the future")]
    InPast { start: DateTime<Utc> },

    #[error("requested start {start} is less than {min_lead_minutes} minutes from now")]
    TooSoon {
        start: DateTime<Utc>,
        min_lead_minutes: i64,
    },

    #[error("requested start {start} is more than {max_advance_days} days ahead")]
    TooFarAhead {
        start: DateTime<Utc>,
        max_advance_days: i64,
    },

    #[error("requested duration {requested_min} min does not match the appointment type duration {expected_min} min")]
    DurationMismatch {
        requested_min: u32,
        expected_min: u32,
    },

    #[error("cancellation must be requested at least {cutoff_hours} hours before the appointment start")]
    PastCancellationCutoff { cutoff_hours: i64 },
}

/// Failures from the provider/patient directory collaborators.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("unknown provider {0}")]
    UnknownProvider(Uuid),

    #[error("unknown appointment type {0}")]
    UnknownAppointmentType(Uuid),

    #[error("invalid schedule template: {0}")]
    InvalidTemplate(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Failures at the persistence boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the store.
    #[error("failed to open appointment store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed.
    #[error("store migration failed: {0}")]
    MigrationFailed(String),

    /// Another non-cancelled appointment occupies the requested interval.
    /// Raised inside the same transaction as the write; the coordinator maps
    /// it to [`BookingError::SlotUnavailable`].
    #[error("another appointment occupies the requested interval")]
    SlotTaken,

    /// Compare-and-set failed: the row's status no longer matches what the
    /// caller read.
    #[error("appointment status changed concurrently (expected '{expected}')")]
    StaleStatus { expected: AppointmentStatus },

    /// Store is locked by another writer.
    #[error("appointment store is locked")]
    Locked,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Configuration load/save failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    #[error("failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Result type alias for booking operations.
pub type Result<T, E = BookingError> = std::result::Result<T, E>;
