//! # Clinibook Core Library
//!
//! This library provides the core scheduling logic for the Clinibook clinic
//! booking system. It is embedding-oriented: all operations take explicit
//! `now` and actor parameters and return outcomes plus effects, so an outer
//! HTTP layer, a CLI or a test harness can drive the same core.
//!
//! ## Architecture
//!
//! - **Availability**: Slot generation from provider schedule templates,
//!   conflict detection against existing appointments and policy filtering
//! - **Lifecycle**: A guarded state machine over the appointment status,
//!   emitting audit and notification effects instead of performing I/O
//! - **Coordinator**: The sole write path; re-validates availability at
//!   commit time and relies on the store's conditional writes to settle
//!   booking races
//! - **Storage**: SQLite-based appointment persistence and TOML-based
//!   configuration
//!
//! ## Key Components
//!
//! - [`BookingCoordinator`]: Entry point for booking, rescheduling and
//!   lifecycle transitions
//! - [`AvailabilityService`]: Read-only slot computation
//! - [`SqliteStore`]: Appointment persistence with atomic overlap checks
//! - [`BookingPolicy`]: Deployment-tunable booking rules

pub mod availability;
pub mod conflict;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod rules;
pub mod slots;
pub mod storage;

pub use availability::AvailabilityService;
pub use coordinator::{BookingCoordinator, BookingOutcome};
pub use directory::{
    InMemoryPatientDirectory, InMemoryProviderDirectory, PatientDirectory, ProviderDirectory,
};
pub use error::{BookingError, ConfigError, DirectoryError, Result, RuleViolation, StoreError};
pub use events::{AuditEvent, Effect, NotificationKind};
pub use lifecycle::{valid_transitions, LifecycleEvent};
pub use model::{
    Appointment, AppointmentStatus, BookingRequest, BookingSource, NewAppointment, PatientDetails,
    ScheduleTemplate, Slot, WorkingPeriod,
};
pub use rules::{BlackoutWindow, BookingPolicy};
pub use storage::{AppointmentStore, SchedulingConfig, SqliteStore};
