//! Overlap detection between candidate intervals and existing appointments.
//!
//! Half-open `[start, end)` semantics throughout: adjacent intervals that
//! share a boundary instant do not overlap.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::model::Appointment;

/// Canonical half-open overlap test: two intervals overlap iff
/// `a.start < b.end && a.end > b.start`. Symmetric in its arguments.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Filter `existing` to the appointments that conflict with the candidate
/// interval.
///
/// Skips the appointment being rescheduled (`exclude_id`) and any
/// appointment whose status does not block its slot (cancelled, no-show).
/// The caller is responsible for supplying the correct set: same provider
/// and location, covering any date the candidate might span.
pub fn find_conflicts<'a>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    existing: &'a [Appointment],
    exclude_id: Option<Uuid>,
) -> Vec<&'a Appointment> {
    let conflicts: Vec<&Appointment> = existing
        .iter()
        .filter(|appt| Some(appt.id) != exclude_id)
        .filter(|appt| appt.status.blocks_slot())
        .filter(|appt| overlaps(start, end, appt.start, appt.end))
        .collect();
    if !conflicts.is_empty() {
        debug!(
            candidate_start = %start,
            count = conflicts.len(),
            "candidate interval conflicts with existing appointments"
        );
    }
    conflicts
}
