//! Appointment state machine.
//!
//! ## Transitions
//!
//! ```text
//! scheduled -> confirmed -> checked_in -> in_progress -> completed
//!          \________\____________\
//!                    cancelled / no_show (terminal)
//! ```
//!
//! The transition table here is the single source of truth for legality.
//! Any event attempted from a state not listed for it fails with
//! `InvalidTransition` and leaves the appointment unchanged. Successful
//! transitions return the effects to perform (audit event, notification-due
//! signal); executing them is the caller's job.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::BookingError;
use crate::events::{AuditEvent, Effect, NotificationKind};
use crate::model::{Appointment, AppointmentStatus};
use crate::rules::{self, BookingPolicy};

/// An event applied to an appointment.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Patient (or staff) confirms the booking.
    Confirm,
    CheckIn,
    StartVisit,
    Complete { notes: Option<String> },
    Cancel { reason: String },
    MarkNoShow,
    Reschedule {
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::CheckIn => "check_in",
            Self::StartVisit => "start_visit",
            Self::Complete { .. } => "complete",
            Self::Cancel { .. } => "cancel",
            Self::MarkNoShow => "mark_no_show",
            Self::Reschedule { .. } => "reschedule",
        }
    }
}

/// All statuses reachable from `status` in one transition.
pub fn valid_transitions(status: AppointmentStatus) -> &'static [AppointmentStatus] {
    use AppointmentStatus::*;
    match status {
        Scheduled => &[Confirmed, CheckedIn, Cancelled, NoShow, Scheduled],
        Confirmed => &[CheckedIn, Cancelled, NoShow, Scheduled],
        CheckedIn => &[InProgress, Completed, Cancelled],
        InProgress => &[Completed],
        Completed | Cancelled | NoShow => &[],
    }
}

/// Apply `event` to `appointment`.
///
/// On success the appointment is mutated in place and the effects to
/// perform are returned. On failure the appointment is left untouched.
///
/// Guards beyond the status table:
/// - `cancel` requires `now` to be before the cancellation cutoff
///   (policy-configured; violation is a `RuleViolation`, not
///   `InvalidTransition`)
/// - `mark_no_show` requires the appointment start to have passed
/// - `reschedule` expects the new interval to have been re-validated by the
///   coordinator; it only swaps the interval and returns to `scheduled`
pub fn apply(
    appointment: &mut Appointment,
    event: LifecycleEvent,
    now: DateTime<Utc>,
    actor_id: Uuid,
    policy: &BookingPolicy,
) -> Result<Vec<Effect>, BookingError> {
    use AppointmentStatus::*;

    let from = appointment.status;
    let id = appointment.id;
    let event_name = event.name();
    let invalid = move || {
        warn!(
            appointment_id = %id,
            from = %from,
            event = event_name,
            "rejected lifecycle transition"
        );
        Err(BookingError::InvalidTransition {
            from,
            event: event_name,
        })
    };

    match (&event, from) {
        (LifecycleEvent::Confirm, Scheduled) => {
            appointment.status = Confirmed;
            Ok(status_effects(appointment, from, actor_id, now, json!({}), None))
        }
        (LifecycleEvent::CheckIn, Scheduled | Confirmed) => {
            appointment.status = CheckedIn;
            appointment.checked_in_at = Some(now);
            Ok(status_effects(appointment, from, actor_id, now, json!({}), None))
        }
        (LifecycleEvent::StartVisit, CheckedIn) => {
            appointment.status = InProgress;
            Ok(status_effects(appointment, from, actor_id, now, json!({}), None))
        }
        (LifecycleEvent::Complete { notes }, CheckedIn | InProgress) => {
            appointment.status = Completed;
            appointment.completed_at = Some(now);
            if let Some(notes) = notes {
                appointment.append_note(notes);
            }
            Ok(status_effects(appointment, from, actor_id, now, json!({}), None))
        }
        (LifecycleEvent::Cancel { reason }, Scheduled | Confirmed | CheckedIn) => {
            rules::check_cancellation_cutoff(appointment.start, now, policy)?;
            appointment.status = Cancelled;
            appointment.cancelled_at = Some(now);
            appointment.cancellation_reason = Some(reason.clone());
            info!(appointment_id = %appointment.id, %reason, "appointment cancelled");
            Ok(status_effects(
                appointment,
                from,
                actor_id,
                now,
                json!({ "reason": reason }),
                Some(NotificationKind::CancellationNotice),
            ))
        }
        (LifecycleEvent::MarkNoShow, Scheduled | Confirmed) => {
            // The start must have passed; exactly at start is not yet a no-show.
            if now <= appointment.start {
                return invalid();
            }
            appointment.status = NoShow;
            Ok(status_effects(
                appointment,
                from,
                actor_id,
                now,
                json!({}),
                Some(NotificationKind::NoShowNotice),
            ))
        }
        (
            LifecycleEvent::Reschedule { new_start, new_end },
            Scheduled | Confirmed,
        ) => {
            let old_start = appointment.start;
            appointment.start = *new_start;
            appointment.end = *new_end;
            appointment.status = Scheduled;
            info!(
                appointment_id = %appointment.id,
                %old_start,
                new_start = %new_start,
                "appointment rescheduled"
            );
            Ok(vec![
                Effect::Audit(AuditEvent::AppointmentRescheduled {
                    appointment_id: appointment.id,
                    old_start,
                    new_start: *new_start,
                    actor_id,
                    at: now,
                }),
                Effect::Notify {
                    kind: NotificationKind::RescheduleNotice,
                    appointment_id: appointment.id,
                },
            ])
        }
        _ => invalid(),
    }
}

fn status_effects(
    appointment: &Appointment,
    from: AppointmentStatus,
    actor_id: Uuid,
    now: DateTime<Utc>,
    details: serde_json::Value,
    notify: Option<NotificationKind>,
) -> Vec<Effect> {
    let mut effects = vec![Effect::Audit(AuditEvent::StatusChanged {
        appointment_id: appointment.id,
        from,
        to: appointment.status,
        actor_id,
        details,
        at: now,
    })];
    if let Some(kind) = notify {
        effects.push(Effect::Notify {
            kind,
            appointment_id: appointment.id,
        });
    }
    effects
}
