//! SQLite-backed appointment store.
//!
//! The overlap invariant is enforced here, not in application memory: the
//! conditional writes run `BEGIN IMMEDIATE` so the overlap re-check and the
//! write see the same committed state, and a partial unique index over
//! `(provider, location, start)` for blocking statuses backstops the exact
//! double-book case. WAL mode plus a busy timeout lets independent
//! connections serialize instead of failing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::{data_dir, AppointmentStore};
use crate::error::StoreError;
use crate::model::{Appointment, AppointmentStatus, BookingSource};

/// SQLite store. One connection per handle; open multiple handles for
/// concurrent writers.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the store at `path`, creating the file and schema if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open the store at the default location,
    /// `~/.config/clinibook/clinibook.db`.
    pub fn open_default() -> Result<Self, StoreError> {
        let path: PathBuf = data_dir()?.join("clinibook.db");
        Self::open(&path)
    }

    /// Open an in-memory store. Each call is an independent database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS appointments (
                    id                  TEXT PRIMARY KEY,
                    code                TEXT NOT NULL UNIQUE,
                    patient_id          TEXT NOT NULL,
                    provider_id         TEXT NOT NULL,
                    location_id         TEXT NOT NULL,
                    appointment_type_id TEXT NOT NULL,
                    start_at            TEXT NOT NULL,
                    end_at              TEXT NOT NULL,
                    status              TEXT NOT NULL,
                    source              TEXT NOT NULL,
                    chief_complaint     TEXT,
                    notes               TEXT,
                    cancellation_reason TEXT,
                    checked_in_at       TEXT,
                    completed_at        TEXT,
                    cancelled_at        TEXT,
                    created_at          TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_appointments_provider_interval
                    ON appointments(provider_id, location_id, start_at);

                -- Backstop for the exact double-book race: only blocking
                -- statuses participate, so a cancelled slot can be rebooked.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_slot
                    ON appointments(provider_id, location_id, start_at)
                    WHERE status NOT IN ('cancelled', 'no_show');",
            )
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    /// Count of blocking appointments overlapping `[start, end)` for the
    /// provider+location, excluding `exclude_id`. Runs inside whatever
    /// transaction the caller holds.
    fn overlap_count(
        &self,
        provider_id: Uuid,
        location_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<i64, StoreError> {
        let exclude = exclude_id.map(|id| id.to_string()).unwrap_or_default();
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM appointments
             WHERE provider_id = ?1 AND location_id = ?2
               AND status NOT IN ('cancelled', 'no_show')
               AND id <> ?3
               AND start_at < ?5 AND end_at > ?4",
            params![
                provider_id.to_string(),
                location_id.to_string(),
                exclude,
                ts(start),
                ts(end),
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn in_transaction<T>(
        &self,
        op: impl FnOnce(&Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        match op(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }
}

impl AppointmentStore for SqliteStore {
    fn appointments_in_range(
        &self,
        provider_id: Uuid,
        location_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, code, patient_id, provider_id, location_id, appointment_type_id,
                    start_at, end_at, status, source, chief_complaint, notes,
                    cancellation_reason, checked_in_at, completed_at, cancelled_at, created_at
             FROM appointments
             WHERE provider_id = ?1 AND location_id = ?2
               AND status NOT IN ('cancelled', 'no_show')
               AND start_at < ?4 AND end_at > ?3
             ORDER BY start_at ASC",
        )?;
        let rows = stmt.query_map(
            params![
                provider_id.to_string(),
                location_id.to_string(),
                ts(from),
                ts(to),
            ],
            row_to_appointment,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let appt = self
            .conn
            .query_row(
                "SELECT id, code, patient_id, provider_id, location_id, appointment_type_id,
                        start_at, end_at, status, source, chief_complaint, notes,
                        cancellation_reason, checked_in_at, completed_at, cancelled_at, created_at
                 FROM appointments WHERE id = ?1",
                params![id.to_string()],
                row_to_appointment,
            )
            .optional()?;
        Ok(appt)
    }

    fn insert(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.in_transaction(|store| {
            let conflicts = store.overlap_count(
                appointment.provider_id,
                appointment.location_id,
                appointment.start,
                appointment.end,
                None,
            )?;
            if conflicts > 0 {
                debug!(appointment_id = %appointment.id, "insert rejected, interval occupied");
                return Err(StoreError::SlotTaken);
            }
            store
                .conn
                .execute(
                    "INSERT INTO appointments (
                        id, code, patient_id, provider_id, location_id, appointment_type_id,
                        start_at, end_at, status, source, chief_complaint, notes,
                        cancellation_reason, checked_in_at, completed_at, cancelled_at, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    params![
                        appointment.id.to_string(),
                        appointment.code,
                        appointment.patient_id.to_string(),
                        appointment.provider_id.to_string(),
                        appointment.location_id.to_string(),
                        appointment.appointment_type_id.to_string(),
                        ts(appointment.start),
                        ts(appointment.end),
                        appointment.status.as_str(),
                        appointment.source.as_str(),
                        appointment.chief_complaint,
                        appointment.notes,
                        appointment.cancellation_reason,
                        appointment.checked_in_at.map(ts),
                        appointment.completed_at.map(ts),
                        appointment.cancelled_at.map(ts),
                        ts(appointment.created_at),
                    ],
                )
                .map_err(constraint_as_slot_taken)?;
            Ok(())
        })
    }

    fn update_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        updated: &Appointment,
    ) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            "UPDATE appointments
             SET status = ?1, notes = ?2, cancellation_reason = ?3,
                 checked_in_at = ?4, completed_at = ?5, cancelled_at = ?6
             WHERE id = ?7 AND status = ?8",
            params![
                updated.status.as_str(),
                updated.notes,
                updated.cancellation_reason,
                updated.checked_in_at.map(ts),
                updated.completed_at.map(ts),
                updated.cancelled_at.map(ts),
                id.to_string(),
                expected.as_str(),
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::StaleStatus { expected });
        }
        Ok(())
    }

    fn apply_reschedule(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.in_transaction(|store| {
            let row: Option<(String, String, String)> = store
                .conn
                .query_row(
                    "SELECT provider_id, location_id, status FROM appointments WHERE id = ?1",
                    params![id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let (provider_id, location_id, status) = match row {
                Some(row) => row,
                None => {
                    return Err(StoreError::QueryFailed(format!(
                        "appointment {id} not found"
                    )))
                }
            };
            if status != expected.as_str() {
                return Err(StoreError::StaleStatus { expected });
            }
            let provider_id = parse_uuid_str(&provider_id)?;
            let location_id = parse_uuid_str(&location_id)?;

            let conflicts =
                store.overlap_count(provider_id, location_id, new_start, new_end, Some(id))?;
            if conflicts > 0 {
                debug!(appointment_id = %id, "reschedule rejected, interval occupied");
                return Err(StoreError::SlotTaken);
            }

            store
                .conn
                .execute(
                    "UPDATE appointments
                     SET start_at = ?1, end_at = ?2, status = 'scheduled'
                     WHERE id = ?3",
                    params![ts(new_start), ts(new_end), id.to_string()],
                )
                .map_err(constraint_as_slot_taken)?;
            Ok(())
        })
    }
}

/// Fixed-width RFC 3339 with whole seconds, so string comparison in SQL
/// matches chronological order.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Only the partial slot index expresses the overlap invariant. Any other
/// constraint failure (say, an appointment code collision) is an ordinary
/// persistence error, not a slot conflict.
fn constraint_as_slot_taken(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(e, Some(msg)) = &err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation
            && msg.contains("idx_appointments_slot")
        {
            return StoreError::SlotTaken;
        }
    }
    err.into()
}

fn parse_uuid_str(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::QueryFailed(format!("malformed uuid '{s}': {e}")))
}

fn row_to_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: get_uuid(row, 0)?,
        code: row.get(1)?,
        patient_id: get_uuid(row, 2)?,
        provider_id: get_uuid(row, 3)?,
        location_id: get_uuid(row, 4)?,
        appointment_type_id: get_uuid(row, 5)?,
        start: get_ts(row, 6)?,
        end: get_ts(row, 7)?,
        status: get_status(row, 8)?,
        source: get_source(row, 9)?,
        chief_complaint: row.get(10)?,
        notes: row.get(11)?,
        cancellation_reason: row.get(12)?,
        checked_in_at: get_opt_ts(row, 13)?,
        completed_at: get_opt_ts(row, 14)?,
        cancelled_at: get_opt_ts(row, 15)?,
        created_at: get_ts(row, 16)?,
    })
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn get_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))
}

fn get_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn get_opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| conversion_err(idx, e)),
    }
}

fn get_status(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<AppointmentStatus> {
    let s: String = row.get(idx)?;
    AppointmentStatus::parse(&s).ok_or_else(|| {
        conversion_err(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown status '{s}'"),
            ),
        )
    })
}

fn get_source(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<BookingSource> {
    let s: String = row.get(idx)?;
    BookingSource::parse(&s).ok_or_else(|| {
        conversion_err(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown booking source '{s}'"),
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingSource, NewAppointment};
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 7, h, m, 0).unwrap()
    }

    fn appointment(
        provider_id: Uuid,
        location_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Appointment {
        Appointment::create(
            NewAppointment {
                patient_id: Uuid::new_v4(),
                provider_id,
                location_id,
                appointment_type_id: Uuid::new_v4(),
                start,
                end,
                source: BookingSource::Online,
                chief_complaint: Some("follow-up".into()),
            },
            at(8, 0),
        )
        .unwrap()
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let appt = appointment(Uuid::new_v4(), Uuid::new_v4(), at(10, 0), at(10, 30));
        store.insert(&appt).unwrap();
        let loaded = store.get(appt.id).unwrap().unwrap();
        assert_eq!(loaded, appt);
        assert_eq!(store.get(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        store
            .insert(&appointment(provider, location, at(10, 0), at(10, 30)))
            .unwrap();
        let result = store.insert(&appointment(provider, location, at(10, 15), at(10, 45)));
        assert!(matches!(result, Err(StoreError::SlotTaken)));
    }

    #[test]
    fn adjacent_insert_is_allowed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        store
            .insert(&appointment(provider, location, at(10, 0), at(10, 30)))
            .unwrap();
        store
            .insert(&appointment(provider, location, at(10, 30), at(11, 0)))
            .unwrap();
    }

    #[test]
    fn other_provider_or_location_does_not_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        store
            .insert(&appointment(provider, location, at(10, 0), at(10, 30)))
            .unwrap();
        store
            .insert(&appointment(Uuid::new_v4(), location, at(10, 0), at(10, 30)))
            .unwrap();
        store
            .insert(&appointment(provider, Uuid::new_v4(), at(10, 0), at(10, 30)))
            .unwrap();
    }

    #[test]
    fn cancelled_slot_can_be_rebooked() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        let mut first = appointment(provider, location, at(10, 0), at(10, 30));
        store.insert(&first).unwrap();

        let expected = first.status;
        first.status = AppointmentStatus::Cancelled;
        first.cancelled_at = Some(at(9, 0));
        first.cancellation_reason = Some("patient request".into());
        store.update_status(first.id, expected, &first).unwrap();

        store
            .insert(&appointment(provider, location, at(10, 0), at(10, 30)))
            .unwrap();
    }

    #[test]
    fn code_collision_on_free_interval_is_not_a_slot_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        let first = appointment(provider, location, at(10, 0), at(10, 30));
        store.insert(&first).unwrap();

        let mut second = appointment(provider, location, at(11, 0), at(11, 30));
        second.code = first.code.clone();
        let result = store.insert(&second);
        assert!(matches!(result, Err(StoreError::QueryFailed(_))));
    }

    #[test]
    fn update_status_is_compare_and_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut appt = appointment(Uuid::new_v4(), Uuid::new_v4(), at(10, 0), at(10, 30));
        store.insert(&appt).unwrap();

        appt.status = AppointmentStatus::Confirmed;
        let result = store.update_status(appt.id, AppointmentStatus::CheckedIn, &appt);
        assert!(matches!(result, Err(StoreError::StaleStatus { .. })));

        store
            .update_status(appt.id, AppointmentStatus::Scheduled, &appt)
            .unwrap();
        assert_eq!(
            store.get(appt.id).unwrap().unwrap().status,
            AppointmentStatus::Confirmed
        );
    }

    #[test]
    fn reschedule_checks_overlap_excluding_self() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        let appt = appointment(provider, location, at(10, 0), at(10, 30));
        store.insert(&appt).unwrap();
        let other = appointment(provider, location, at(11, 0), at(11, 30));
        store.insert(&other).unwrap();

        // Moving onto the other appointment fails.
        let result =
            store.apply_reschedule(appt.id, AppointmentStatus::Scheduled, at(11, 0), at(11, 30));
        assert!(matches!(result, Err(StoreError::SlotTaken)));
        assert_eq!(store.get(appt.id).unwrap().unwrap().start, at(10, 0));

        // Moving within its own old interval is fine (self is excluded).
        store
            .apply_reschedule(appt.id, AppointmentStatus::Scheduled, at(10, 15), at(10, 45))
            .unwrap();
        assert_eq!(store.get(appt.id).unwrap().unwrap().start, at(10, 15));
    }

    #[test]
    fn range_query_excludes_non_blocking_and_orders_ascending() {
        let store = SqliteStore::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let location = Uuid::new_v4();
        let late = appointment(provider, location, at(14, 0), at(14, 30));
        store.insert(&late).unwrap();
        let early = appointment(provider, location, at(9, 0), at(9, 30));
        store.insert(&early).unwrap();
        let mut gone = appointment(provider, location, at(11, 0), at(11, 30));
        store.insert(&gone).unwrap();
        let expected = gone.status;
        gone.status = AppointmentStatus::NoShow;
        store.update_status(gone.id, expected, &gone).unwrap();

        let found = store
            .appointments_in_range(provider, location, at(0, 0), at(23, 59))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, early.id);
        assert_eq!(found[1].id, late.id);
    }
}
