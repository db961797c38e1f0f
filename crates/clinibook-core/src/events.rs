//! Effects produced by mutating operations.
//!
//! Instead of dispatching to an ambient event bus, every successful mutation
//! returns the list of effects to perform: audit events for the audit sink
//! and notification-due signals for the dispatch collaborator. Executing
//! them is the surrounding system's responsibility, and operation success
//! never depends on delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::AppointmentStatus;

/// Structured audit record for the external audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    AppointmentBooked {
        appointment_id: Uuid,
        code: String,
        provider_id: Uuid,
        patient_id: Uuid,
        start: DateTime<Utc>,
        actor_id: Uuid,
        at: DateTime<Utc>,
    },
    StatusChanged {
        appointment_id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
        actor_id: Uuid,
        details: serde_json::Value,
        at: DateTime<Utc>,
    },
    AppointmentRescheduled {
        appointment_id: Uuid,
        old_start: DateTime<Utc>,
        new_start: DateTime<Utc>,
        actor_id: Uuid,
        at: DateTime<Utc>,
    },
}

/// What kind of notification is due. Delivery (email/SMS, content,
/// retries) belongs to the dispatch collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmation,
    CancellationNotice,
    RescheduleNotice,
    NoShowNotice,
    ReminderDue,
}

/// A deferred side effect returned from a mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "effect")]
pub enum Effect {
    Audit(AuditEvent),
    Notify {
        kind: NotificationKind,
        appointment_id: Uuid,
    },
}
