//! Booking coordinator: the sole write path into the appointment store.
//!
//! External callers create, reschedule and cancel appointments here. Every
//! mutating operation re-validates availability at commit time to close the
//! gap between a client reading availability and submitting a booking; the
//! store's conditional writes are the final arbiter of the race, so no
//! in-core locking exists. Operations take explicit `now` and actor
//! parameters — there is no ambient clock or user context.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability::AvailabilityService;
use crate::directory::{PatientDirectory, ProviderDirectory};
use crate::error::{BookingError, StoreError};
use crate::events::{AuditEvent, Effect, NotificationKind};
use crate::lifecycle::{self, LifecycleEvent};
use crate::model::{end_of, Appointment, BookingRequest, NewAppointment};
use crate::rules::{self, BookingPolicy};
use crate::storage::AppointmentStore;

/// Result of a successful mutating operation: the appointment as persisted
/// plus the effects the surrounding system must perform.
#[derive(Debug)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub effects: Vec<Effect>,
}

/// Entry point for all appointment mutations.
pub struct BookingCoordinator<'a> {
    providers: &'a dyn ProviderDirectory,
    patients: &'a dyn PatientDirectory,
    store: &'a dyn AppointmentStore,
    policy: BookingPolicy,
}

impl<'a> BookingCoordinator<'a> {
    pub fn new(
        providers: &'a dyn ProviderDirectory,
        patients: &'a dyn PatientDirectory,
        store: &'a dyn AppointmentStore,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            providers,
            patients,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Read-only availability view over the same collaborators.
    pub fn availability(&self) -> AvailabilityService<'_> {
        AvailabilityService::new(self.providers, self.store, &self.policy)
    }

    /// Create an appointment.
    ///
    /// Steps: shape validation, rule validation, patient resolution, a
    /// fresh availability re-check restricted to the requested date, then
    /// the atomic conditional insert. A constraint violation on the insert
    /// is the overlap invariant and surfaces as
    /// [`BookingError::SlotUnavailable`].
    pub fn book(
        &self,
        request: BookingRequest,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        validate_shape(&request)?;

        let duration_min = self
            .providers
            .appointment_type_duration(request.appointment_type_id)?;
        rules::validate_request(request.start, duration_min, duration_min, now, &self.policy)?;

        let patient_id = self.patients.find_or_create_patient(&request.patient)?;

        if !self.availability().is_start_bookable(
            request.provider_id,
            request.location_id,
            request.start,
            duration_min,
            now,
            None,
        )? {
            return Err(BookingError::SlotUnavailable {
                provider_id: request.provider_id,
                start: request.start,
            });
        }

        let appointment = Appointment::create(
            NewAppointment {
                patient_id,
                provider_id: request.provider_id,
                location_id: request.location_id,
                appointment_type_id: request.appointment_type_id,
                start: request.start,
                end: end_of(request.start, duration_min),
                source: request.source,
                chief_complaint: request.chief_complaint,
            },
            now,
        )?;

        match self.store.insert(&appointment) {
            Ok(()) => {}
            Err(StoreError::SlotTaken) => {
                warn!(
                    provider_id = %request.provider_id,
                    start = %request.start,
                    "lost the booking race at commit time"
                );
                return Err(BookingError::SlotUnavailable {
                    provider_id: request.provider_id,
                    start: request.start,
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            appointment_id = %appointment.id,
            code = %appointment.code,
            provider_id = %appointment.provider_id,
            start = %appointment.start,
            "appointment booked"
        );
        let effects = vec![
            Effect::Audit(AuditEvent::AppointmentBooked {
                appointment_id: appointment.id,
                code: appointment.code.clone(),
                provider_id: appointment.provider_id,
                patient_id: appointment.patient_id,
                start: appointment.start,
                actor_id,
                at: now,
            }),
            Effect::Notify {
                kind: NotificationKind::BookingConfirmation,
                appointment_id: appointment.id,
            },
        ];
        Ok(BookingOutcome {
            appointment,
            effects,
        })
    }

    /// Move an appointment to a new start, keeping its duration.
    ///
    /// The new interval goes through the same rule validation and fresh
    /// availability re-check as a booking (excluding the appointment
    /// itself), and the interval swap is atomic in the store. On any
    /// failure the appointment is left unchanged.
    pub fn reschedule(
        &self,
        appointment_id: Uuid,
        new_start: DateTime<Utc>,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        let stored = self.load(appointment_id)?;
        let provider_id = stored.provider_id;
        let duration_min = u32::try_from(stored.duration_minutes())
            .map_err(|_| BookingError::InvalidRequest("appointment duration out of range".into()))?;

        rules::validate_request(new_start, duration_min, duration_min, now, &self.policy)?;

        if !self.availability().is_start_bookable(
            stored.provider_id,
            stored.location_id,
            new_start,
            duration_min,
            now,
            Some(appointment_id),
        )? {
            return Err(BookingError::SlotUnavailable {
                provider_id,
                start: new_start,
            });
        }

        let expected = stored.status;
        let new_end = end_of(new_start, duration_min);
        let mut updated = stored;
        let effects = lifecycle::apply(
            &mut updated,
            LifecycleEvent::Reschedule { new_start, new_end },
            now,
            actor_id,
            &self.policy,
        )?;

        match self
            .store
            .apply_reschedule(appointment_id, expected, new_start, new_end)
        {
            Ok(()) => {}
            Err(StoreError::SlotTaken) => {
                warn!(
                    appointment_id = %appointment_id,
                    start = %new_start,
                    "lost the reschedule race at commit time"
                );
                return Err(BookingError::SlotUnavailable {
                    provider_id,
                    start: new_start,
                });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(BookingOutcome {
            appointment: updated,
            effects,
        })
    }

    /// Cancel an appointment, subject to the cancellation cutoff.
    pub fn cancel(
        &self,
        appointment_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(
            appointment_id,
            LifecycleEvent::Cancel {
                reason: reason.to_string(),
            },
            now,
            actor_id,
        )
    }

    pub fn confirm(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(appointment_id, LifecycleEvent::Confirm, now, actor_id)
    }

    pub fn check_in(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(appointment_id, LifecycleEvent::CheckIn, now, actor_id)
    }

    pub fn start_visit(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(appointment_id, LifecycleEvent::StartVisit, now, actor_id)
    }

    pub fn complete(
        &self,
        appointment_id: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(
            appointment_id,
            LifecycleEvent::Complete { notes },
            now,
            actor_id,
        )
    }

    pub fn mark_no_show(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(appointment_id, LifecycleEvent::MarkNoShow, now, actor_id)
    }

    fn load(&self, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        self.store
            .get(appointment_id)?
            .ok_or(BookingError::NotFound(appointment_id))
    }

    /// Apply a lifecycle event and persist it with a compare-and-set on
    /// the status read here, so a concurrent transition cannot be silently
    /// overwritten.
    fn transition(
        &self,
        appointment_id: Uuid,
        event: LifecycleEvent,
        now: DateTime<Utc>,
        actor_id: Uuid,
    ) -> Result<BookingOutcome, BookingError> {
        let stored = self.load(appointment_id)?;
        let expected = stored.status;
        let mut updated = stored;
        let effects = lifecycle::apply(&mut updated, event, now, actor_id, &self.policy)?;
        self.store.update_status(appointment_id, expected, &updated)?;
        Ok(BookingOutcome {
            appointment: updated,
            effects,
        })
    }
}

fn validate_shape(request: &BookingRequest) -> Result<(), BookingError> {
    if request.provider_id.is_nil() {
        return Err(BookingError::InvalidRequest("provider id is required".into()));
    }
    if request.location_id.is_nil() {
        return Err(BookingError::InvalidRequest("location id is required".into()));
    }
    if request.appointment_type_id.is_nil() {
        return Err(BookingError::InvalidRequest(
            "appointment type id is required".into(),
        ));
    }
    if request.patient.name.trim().is_empty() {
        return Err(BookingError::InvalidRequest("patient name is required".into()));
    }
    if request.patient.contact.trim().is_empty() {
        return Err(BookingError::InvalidRequest(
            "patient contact identifier is required".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryPatientDirectory, InMemoryProviderDirectory};
    use crate::error::RuleViolation;
    use crate::model::{
        AppointmentStatus, BookingSource, PatientDetails, ScheduleTemplate, WorkingPeriod,
    };
    use crate::storage::SqliteStore;
    use chrono::{Duration, NaiveTime, TimeZone, Weekday};

    struct Fixture {
        providers: InMemoryProviderDirectory,
        patients: InMemoryPatientDirectory,
        store: SqliteStore,
        provider_id: Uuid,
        location_id: Uuid,
        type_id: Uuid,
    }

    /// Provider works 08:00-17:00 Mon-Fri; the appointment type is 30 min.
    fn fixture() -> Fixture {
        let mut providers = InMemoryProviderDirectory::new();
        let provider_id = Uuid::new_v4();
        let type_id = Uuid::new_v4();
        let template = ScheduleTemplate::new(vec![WorkingPeriod::new(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
        .unwrap()])
        .unwrap();
        for weekday in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ] {
            providers.set_template(provider_id, weekday, template.clone());
        }
        providers.set_appointment_type(type_id, 30);
        Fixture {
            providers,
            patients: InMemoryPatientDirectory::new(),
            store: SqliteStore::open_in_memory().unwrap(),
            provider_id,
            location_id: Uuid::new_v4(),
            type_id,
        }
    }

    impl Fixture {
        fn coordinator(&self) -> BookingCoordinator<'_> {
            BookingCoordinator::new(
                &self.providers,
                &self.patients,
                &self.store,
                BookingPolicy::default(),
            )
        }

        fn request(&self, start: DateTime<Utc>) -> BookingRequest {
            BookingRequest {
                provider_id: self.provider_id,
                location_id: self.location_id,
                appointment_type_id: self.type_id,
                start,
                patient: PatientDetails {
                    name: "Ada Lovelace".into(),
                    contact: "ada@example.com".into(),
                },
                source: BookingSource::Online,
                chief_complaint: Some("headache".into()),
            }
        }
    }

    // 2026-09-07 is a Monday.
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 7, h, m, 0).unwrap()
    }

    fn actor() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn book_creates_scheduled_appointment_with_effects() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let outcome = coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap();

        let appt = &outcome.appointment;
        assert_eq!(appt.status, AppointmentStatus::Scheduled);
        assert_eq!(appt.end, at(10, 30));
        assert!(appt.code.starts_with("APT20260907"));
        assert!(matches!(
            outcome.effects[0],
            Effect::Audit(AuditEvent::AppointmentBooked { .. })
        ));
        assert!(matches!(
            outcome.effects[1],
            Effect::Notify {
                kind: NotificationKind::BookingConfirmation,
                ..
            }
        ));

        // The slot is gone from availability.
        let slots = coordinator
            .availability()
            .available_slots(
                fx.provider_id,
                fx.location_id,
                at(10, 0).date_naive(),
                30,
                at(6, 0),
            )
            .unwrap();
        assert!(slots.iter().all(|s| s.start != at(10, 0)));
    }

    #[test]
    fn overlapping_second_booking_is_unavailable() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap();
        // 10:15-10:45 overlaps 10:00-10:30 (and is off-grid anyway).
        let result = coordinator.book(fx.request(at(10, 15)), at(6, 0), actor());
        assert!(matches!(result, Err(BookingError::SlotUnavailable { .. })));
    }

    #[test]
    fn book_respects_lead_time_at_commit() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        // now=09:00 with a 2-hour lead: 10:00 is offered to nobody.
        let result = coordinator.book(fx.request(at(10, 0)), at(9, 0), actor());
        assert!(matches!(
            result,
            Err(BookingError::Rule(RuleViolation::TooSoon { .. }))
        ));
    }

    #[test]
    fn book_rejects_rule_violations() {
        let fx = fixture();
        let coordinator = fx.coordinator();

        let past = coordinator.book(fx.request(at(10, 0)), at(11, 0), actor());
        assert!(matches!(
            past,
            Err(BookingError::Rule(RuleViolation::InPast { .. }))
        ));

        let far = coordinator.book(
            fx.request(at(10, 0) + Duration::days(45)),
            at(6, 0),
            actor(),
        );
        assert!(matches!(
            far,
            Err(BookingError::Rule(RuleViolation::TooFarAhead { .. }))
        ));
    }

    #[test]
    fn book_rejects_malformed_requests() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let mut request = fx.request(at(10, 0));
        request.patient.contact = "  ".into();
        assert!(matches!(
            coordinator.book(request, at(6, 0), actor()),
            Err(BookingError::InvalidRequest(_))
        ));
    }

    #[test]
    fn book_surfaces_unknown_appointment_type() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let mut request = fx.request(at(10, 0));
        request.appointment_type_id = Uuid::new_v4();
        assert!(matches!(
            coordinator.book(request, at(6, 0), actor()),
            Err(BookingError::Directory(_))
        ));
    }

    #[test]
    fn same_patient_contact_resolves_once() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let first = coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap();
        let second = coordinator
            .book(fx.request(at(11, 0)), at(6, 0), actor())
            .unwrap();
        assert_eq!(first.appointment.patient_id, second.appointment.patient_id);
        assert_eq!(fx.patients.len(), 1);
    }

    #[test]
    fn reschedule_moves_the_interval() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let booked = coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap();

        let outcome = coordinator
            .reschedule(booked.appointment.id, at(14, 0), at(6, 0), actor())
            .unwrap();
        assert_eq!(outcome.appointment.start, at(14, 0));
        assert_eq!(outcome.appointment.end, at(14, 30));
        assert_eq!(outcome.appointment.status, AppointmentStatus::Scheduled);

        let stored = fx.store.get(booked.appointment.id).unwrap().unwrap();
        assert_eq!(stored.start, at(14, 0));

        // The old slot is free again.
        coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap();
    }

    #[test]
    fn reschedule_to_conflicting_slot_leaves_original_unchanged() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let first = coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap();
        coordinator
            .book(fx.request(at(14, 0)), at(6, 0), actor())
            .unwrap();

        let result = coordinator.reschedule(first.appointment.id, at(14, 0), at(6, 0), actor());
        assert!(matches!(result, Err(BookingError::SlotUnavailable { .. })));

        let stored = fx.store.get(first.appointment.id).unwrap().unwrap();
        assert_eq!(stored.start, at(10, 0));
        assert_eq!(stored.end, at(10, 30));
    }

    #[test]
    fn cancel_respects_cutoff_and_frees_the_slot() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let start = at(10, 0) + Duration::days(7);
        let booked = coordinator
            .book(fx.request(start), at(6, 0), actor())
            .unwrap();
        let id = booked.appointment.id;

        // 23 hours before: rejected by the 24-hour cutoff.
        let late = coordinator.cancel(id, "can't make it", start - Duration::hours(23), actor());
        assert!(matches!(late, Err(BookingError::Rule(_))));
        assert_eq!(
            fx.store.get(id).unwrap().unwrap().status,
            AppointmentStatus::Scheduled
        );

        // 25 hours before: allowed.
        let outcome = coordinator
            .cancel(id, "can't make it", start - Duration::hours(25), actor())
            .unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
        assert!(outcome.effects.iter().any(|e| matches!(
            e,
            Effect::Notify {
                kind: NotificationKind::CancellationNotice,
                ..
            }
        )));

        // The interval is bookable again.
        coordinator.book(fx.request(start), at(6, 0), actor()).unwrap();
    }

    #[test]
    fn visit_flow_through_coordinator() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let start = at(10, 0);
        let id = coordinator
            .book(fx.request(start), at(6, 0), actor())
            .unwrap()
            .appointment
            .id;

        coordinator.confirm(id, at(7, 0), actor()).unwrap();
        coordinator.check_in(id, start, actor()).unwrap();
        coordinator.start_visit(id, start, actor()).unwrap();
        let outcome = coordinator
            .complete(id, Some("all clear".into()), at(10, 25), actor())
            .unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::Completed);
        assert_eq!(outcome.appointment.notes.as_deref(), Some("all clear"));

        // Terminal: nothing else is allowed.
        assert!(matches!(
            coordinator.check_in(id, at(10, 30), actor()),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn mark_no_show_requires_start_to_have_passed() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        let id = coordinator
            .book(fx.request(at(10, 0)), at(6, 0), actor())
            .unwrap()
            .appointment
            .id;

        assert!(matches!(
            coordinator.mark_no_show(id, at(9, 55), actor()),
            Err(BookingError::InvalidTransition { .. })
        ));
        let outcome = coordinator.mark_no_show(id, at(10, 20), actor()).unwrap();
        assert_eq!(outcome.appointment.status, AppointmentStatus::NoShow);
    }

    #[test]
    fn unknown_appointment_is_not_found() {
        let fx = fixture();
        let coordinator = fx.coordinator();
        assert!(matches!(
            coordinator.cancel(Uuid::new_v4(), "x", at(6, 0), actor()),
            Err(BookingError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_bookings_for_one_slot_succeed_at_most_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let fx = fixture();
        // The fixture's own store holds a connection that cannot cross
        // threads; each worker opens its own connection to a shared file.
        let providers = &fx.providers;
        let patients = &fx.patients;
        let template = fx.request(at(10, 0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appointments.db");
        // Settle the schema before the writers race.
        SqliteStore::open(&path).unwrap();

        let successes = AtomicUsize::new(0);
        let losses = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let template = template.clone();
                let path = &path;
                let successes = &successes;
                let losses = &losses;
                scope.spawn(move || {
                    let store = SqliteStore::open(path).unwrap();
                    let coordinator = BookingCoordinator::new(
                        providers,
                        patients,
                        &store,
                        BookingPolicy::default(),
                    );
                    let mut request = template;
                    request.patient.contact = format!("patient{worker}@example.com");
                    match coordinator.book(request, at(6, 0), actor()) {
                        Ok(_) => {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(BookingError::SlotUnavailable { .. }) => {
                            losses.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => panic!("unexpected booking failure: {e}"),
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(losses.load(Ordering::SeqCst), 7);
    }
}
