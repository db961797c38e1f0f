//! Data model for the scheduling core.
//!
//! - [`Appointment`]: the central persisted entity, mutated only through
//!   lifecycle transitions
//! - [`ScheduleTemplate`] / [`WorkingPeriod`]: read-only schedule input from
//!   the provider directory
//! - [`Slot`]: transient candidate interval, never persisted
//! - [`BookingRequest`]: one-shot caller intent consumed by the coordinator
//!
//! All fields are enumerated explicitly; there is no reflection-style
//! population, so an unknown field is a compile error rather than silently
//! dropped data.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BookingError, DirectoryError};

/// Minimum appointment duration in minutes.
pub const MIN_DURATION_MIN: u32 = 15;

/// Status of an appointment. The transition table in [`crate::lifecycle`] is
/// the single source of truth for which changes are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Stable string form used for storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked_in",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    /// Parse the storage string form. Unknown strings are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "confirmed" => Some(Self::Confirmed),
            "checked_in" => Some(Self::CheckedIn),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }

    /// Terminal statuses permit no further transitions (administrative
    /// notes excepted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }

    /// Whether an appointment in this status occupies its interval for
    /// conflict purposes. Cancelled and no-show appointments do not block.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a booking originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingSource {
    Online,
    Staff,
    Other,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Staff => "staff",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "staff" => Some(Self::Staff),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A candidate bookable interval. Produced transiently by the slot generator
/// and the availability service; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Human-facing label, e.g. `09:00 - 09:30`.
    pub display: String,
}

impl Slot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let display = format!("{} - {}", start.format("%H:%M"), end.format("%H:%M"));
        Self {
            start,
            end,
            display,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// A contiguous range within a day during which a provider is schedulable,
/// in local clinic time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingPeriod {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingPeriod {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, DirectoryError> {
        if end <= start {
            return Err(DirectoryError::InvalidTemplate(format!(
                "working period end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }
}

/// Ordered, disjoint working periods for one provider on one day of week.
/// Supplied by the provider directory; read-only input to this core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    periods: Vec<WorkingPeriod>,
}

impl ScheduleTemplate {
    /// Build a template, sorting the periods and rejecting overlaps.
    pub fn new(mut periods: Vec<WorkingPeriod>) -> Result<Self, DirectoryError> {
        periods.sort_by_key(|p| p.start);
        for pair in periods.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(DirectoryError::InvalidTemplate(format!(
                    "working periods {}-{} and {}-{} overlap",
                    pair[0].start, pair[0].end, pair[1].start, pair[1].end
                )));
            }
        }
        Ok(Self { periods })
    }

    /// Template for a day the clinic is closed.
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn periods(&self) -> &[WorkingPeriod] {
        &self.periods
    }
}

/// Contact fields used to resolve a patient against the patient directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub name: String,
    /// Contact identifier (email or phone) used for match-by-contact lookup.
    pub contact: String,
}

/// Caller intent for a new booking. Consumed once by the coordinator and
/// never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub provider_id: Uuid,
    pub location_id: Uuid,
    pub appointment_type_id: Uuid,
    pub start: DateTime<Utc>,
    pub patient: PatientDetails,
    pub source: BookingSource,
    #[serde(default)]
    pub chief_complaint: Option<String>,
}

/// Field set for constructing an [`Appointment`].
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub location_id: Uuid,
    pub appointment_type_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: BookingSource,
    pub chief_complaint: Option<String>,
}

/// The central entity. Created in `scheduled` status by the coordinator and
/// mutated only through lifecycle transitions; cancellation is a status
/// change, never row removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    /// System-internal id, opaque and stable.
    pub id: Uuid,
    /// Human-facing code, e.g. `APT20260830K7QX`. Unique, never reused.
    pub code: String,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub location_id: Uuid,
    pub appointment_type_id: Uuid,
    pub start: DateTime<Utc>,
    /// Always `start + duration`.
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub source: BookingSource,
    #[serde(default)]
    pub chief_complaint: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub checked_in_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    /// Construct a new appointment in `scheduled` status.
    ///
    /// # Errors
    /// Returns [`BookingError::InvalidRequest`] if the interval is inverted
    /// or shorter than [`MIN_DURATION_MIN`].
    pub fn create(fields: NewAppointment, now: DateTime<Utc>) -> Result<Self, BookingError> {
        if fields.end <= fields.start {
            return Err(BookingError::InvalidRequest(format!(
                "appointment end {} must be after start {}",
                fields.end, fields.start
            )));
        }
        let duration_min = (fields.end - fields.start).num_minutes();
        if duration_min < i64::from(MIN_DURATION_MIN) {
            return Err(BookingError::InvalidRequest(format!(
                "appointment duration {duration_min} min is below the {MIN_DURATION_MIN} min minimum"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            code: generate_code(fields.start),
            patient_id: fields.patient_id,
            provider_id: fields.provider_id,
            location_id: fields.location_id,
            appointment_type_id: fields.appointment_type_id,
            start: fields.start,
            end: fields.end,
            status: AppointmentStatus::Scheduled,
            source: fields.source,
            chief_complaint: fields.chief_complaint,
            notes: None,
            cancellation_reason: None,
            checked_in_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: now,
        })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Half-open interval occupied by this appointment.
    pub fn interval(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end)
    }

    /// Append an administrative note. This is the one mutation permitted on
    /// a terminal appointment.
    pub fn append_note(&mut self, note: &str) {
        match &mut self.notes {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(note);
            }
            None => self.notes = Some(note.to_string()),
        }
    }
}

/// Generate a human-facing appointment code: `APT` + booking date + a random
/// 4-character suffix drawn uniformly from uppercase letters and digits.
fn generate_code(start: DateTime<Utc>) -> String {
    const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect();
    format!("APT{}{}", start.format("%Y%m%d"), suffix)
}

/// Convenience for `start + duration` arithmetic on minute counts.
pub fn end_of(start: DateTime<Utc>, duration_min: u32) -> DateTime<Utc> {
    start + Duration::minutes(i64::from(duration_min))
}
