//! Persistence boundary for appointments.
//!
//! The store is the single source of truth and the sole arbiter of the
//! "no two appointments occupy the same provider+location+interval" race:
//! [`AppointmentStore::insert`] and [`AppointmentStore::apply_reschedule`]
//! re-run the overlap check against the latest committed state inside the
//! same transaction as the write.

pub mod config;
pub mod sqlite;

pub use config::SchedulingConfig;
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Appointment, AppointmentStatus};

/// Durable appointment storage.
///
/// Appointments are never physically deleted through this trait;
/// cancellation is a status change.
pub trait AppointmentStore {
    /// Appointments for `(provider, location)` whose interval intersects
    /// `[from, to)` and whose status blocks a slot. Ordered by start
    /// ascending.
    fn appointments_in_range(
        &self,
        provider_id: Uuid,
        location_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Atomic conditional insert: re-validates non-overlap against the
    /// latest committed state in the same transaction and fails with
    /// [`StoreError::SlotTaken`] if another blocking appointment occupies
    /// the interval.
    fn insert(&self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Compare-and-set status update: persists the updated appointment's
    /// status, timestamps, reason and notes, but only while the stored
    /// status still equals `expected`. Fails with
    /// [`StoreError::StaleStatus`] otherwise.
    fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        updated: &Appointment,
    ) -> Result<(), StoreError>;

    /// Atomic reschedule: verifies the stored status still equals
    /// `expected`, re-runs the overlap check for the new interval
    /// (excluding the appointment itself) and swaps the interval, all in
    /// one transaction. The appointment returns to `scheduled`.
    fn apply_reschedule(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Returns `~/.config/clinibook[-dev]/` based on CLINIBOOK_ENV.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("CLINIBOOK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("clinibook-dev")
    } else {
        base_dir.join("clinibook")
    };

    std::fs::create_dir_all(&dir).map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    Ok(dir)
}
