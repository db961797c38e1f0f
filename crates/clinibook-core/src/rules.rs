//! Business booking rules and the policy that parameterizes them.
//!
//! Every threshold here is configuration, not a hardcoded constant: lead
//! time, advance-booking window, cancellation cutoff and blackout windows
//! are all overridable per deployment through [`BookingPolicy`].

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RuleViolation;
use crate::model::Slot;

/// A time range during which no slot may be offered regardless of provider
/// availability, in local clinic time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub label: String,
}

impl BlackoutWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, label: &str) -> Self {
        Self {
            start,
            end,
            label: label.to_string(),
        }
    }

    /// Whether a slot starting at `t` falls inside this window.
    pub fn covers_start(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// Deployment-level booking policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// Minimum gap between "now" and a bookable slot's start, in minutes.
    #[serde(default = "default_min_lead_minutes")]
    pub min_lead_minutes: i64,
    /// Maximum days ahead a booking may be placed.
    #[serde(default = "default_max_advance_days")]
    pub max_advance_days: i64,
    /// Minimum hours before the start required to permit cancellation.
    #[serde(default = "default_cancellation_cutoff_hours")]
    pub cancellation_cutoff_hours: i64,
    /// Windows during which no slot is offered.
    #[serde(default = "default_blackout_windows")]
    pub blackout_windows: Vec<BlackoutWindow>,
}

fn default_min_lead_minutes() -> i64 {
    120
}
fn default_max_advance_days() -> i64 {
    30
}
fn default_cancellation_cutoff_hours() -> i64 {
    24
}
fn default_blackout_windows() -> Vec<BlackoutWindow> {
    vec![BlackoutWindow::new(
        NaiveTime::from_hms_opt(12, 0, 0).expect("valid constant time"),
        NaiveTime::from_hms_opt(13, 0, 0).expect("valid constant time"),
        "lunch",
    )]
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_lead_minutes: default_min_lead_minutes(),
            max_advance_days: default_max_advance_days(),
            cancellation_cutoff_hours: default_cancellation_cutoff_hours(),
            blackout_windows: default_blackout_windows(),
        }
    }
}

impl BookingPolicy {
    fn earliest_bookable(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(self.min_lead_minutes)
    }

    fn in_blackout(&self, start: DateTime<Utc>) -> bool {
        let t = start.time();
        self.blackout_windows.iter().any(|w| w.covers_start(t))
    }
}

/// Drop slots that start before `now + min_lead_minutes` or inside a
/// blackout window. Preserves order.
pub fn filter_bookable(
    slots: impl IntoIterator<Item = Slot>,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Vec<Slot> {
    let earliest = policy.earliest_bookable(now);
    slots
        .into_iter()
        .filter(|slot| slot.start >= earliest)
        .filter(|slot| !policy.in_blackout(slot.start))
        .collect()
}

/// Commit-time request validation: the start must be strictly in the
/// future, far enough out to honor the lead time, within the advance
/// window, and the requested duration must match the appointment type's
/// configured duration.
pub fn validate_request(
    start: DateTime<Utc>,
    requested_duration_min: u32,
    expected_duration_min: u32,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<(), RuleViolation> {
    if start <= now {
        return Err(RuleViolation::InPast { start });
    }
    if start < policy.earliest_bookable(now) {
        return Err(RuleViolation::TooSoon {
            start,
            min_lead_minutes: policy.min_lead_minutes,
        });
    }
    if start > now + Duration::days(policy.max_advance_days) {
        return Err(RuleViolation::TooFarAhead {
            start,
            max_advance_days: policy.max_advance_days,
        });
    }
    if requested_duration_min != expected_duration_min {
        return Err(RuleViolation::DurationMismatch {
            requested_min: requested_duration_min,
            expected_min: expected_duration_min,
        });
    }
    Ok(())
}

/// Cancellation guard: `now` must be at least `cancellation_cutoff_hours`
/// before the appointment start.
pub fn check_cancellation_cutoff(
    appointment_start: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<(), RuleViolation> {
    let cutoff = appointment_start - Duration::hours(policy.cancellation_cutoff_hours);
    if now >= cutoff {
        return Err(RuleViolation::PastCancellationCutoff {
            cutoff_hours: policy.cancellation_cutoff_hours,
        });
    }
    Ok(())
}
