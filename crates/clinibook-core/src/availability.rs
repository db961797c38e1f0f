//! Availability computation: which slots are bookable for a provider at a
//! location on a date.
//!
//! Read-mostly and side-effect-free: a pure function of the schedule
//! template, the existing appointments and the booking policy. A slightly
//! stale read is acceptable; the coordinator closes the gap with a
//! commit-time re-check against the store.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::conflict;
use crate::directory::ProviderDirectory;
use crate::error::BookingError;
use crate::model::Slot;
use crate::rules::{self, BookingPolicy};
use crate::slots::slots_in_period;
use crate::storage::AppointmentStore;

/// Composes the slot generator, conflict detector and rule engine over the
/// directory and store collaborators. Borrows everything; holds no state of
/// its own.
pub struct AvailabilityService<'a> {
    providers: &'a dyn ProviderDirectory,
    store: &'a dyn AppointmentStore,
    policy: &'a BookingPolicy,
}

impl<'a> AvailabilityService<'a> {
    pub fn new(
        providers: &'a dyn ProviderDirectory,
        store: &'a dyn AppointmentStore,
        policy: &'a BookingPolicy,
    ) -> Self {
        Self {
            providers,
            store,
            policy,
        }
    }

    /// Bookable slots for `(provider, location)` on `date`, ordered by
    /// start ascending.
    ///
    /// Deterministic for a fixed snapshot of templates and appointments;
    /// may be called arbitrarily often.
    pub fn available_slots(
        &self,
        provider_id: Uuid,
        location_id: Uuid,
        date: NaiveDate,
        duration_min: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError> {
        let template = self.providers.schedule_template(provider_id, date.weekday())?;
        if template.is_empty() {
            return Ok(Vec::new());
        }

        let (day_start, day_end) = day_bounds(date);
        let existing =
            self.store
                .appointments_in_range(provider_id, location_id, day_start, day_end)?;

        let mut candidates = Vec::new();
        for period in template.periods() {
            for slot in slots_in_period(date, period, duration_min) {
                if conflict::find_conflicts(slot.start, slot.end, &existing, None).is_empty() {
                    candidates.push(slot);
                }
            }
        }

        let bookable = rules::filter_bookable(candidates, now, self.policy);
        debug!(
            %provider_id,
            %date,
            count = bookable.len(),
            "computed available slots"
        );
        Ok(bookable)
    }

    /// Whether a slot starting at `start` is bookable right now: it must
    /// lie on the generated slot grid for its date, be conflict-free and
    /// survive the rule filter. `exclude_id` skips the appointment being
    /// rescheduled.
    pub fn is_start_bookable(
        &self,
        provider_id: Uuid,
        location_id: Uuid,
        start: DateTime<Utc>,
        duration_min: u32,
        now: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<bool, BookingError> {
        let date = start.date_naive();
        let template = self.providers.schedule_template(provider_id, date.weekday())?;
        if template.is_empty() {
            return Ok(false);
        }

        let (day_start, day_end) = day_bounds(date);
        let existing =
            self.store
                .appointments_in_range(provider_id, location_id, day_start, day_end)?;

        for period in template.periods() {
            for slot in slots_in_period(date, period, duration_min) {
                if slot.start != start {
                    continue;
                }
                if !conflict::find_conflicts(slot.start, slot.end, &existing, exclude_id)
                    .is_empty()
                {
                    return Ok(false);
                }
                return Ok(!rules::filter_bookable([slot], now, self.policy).is_empty());
            }
        }
        // Off the slot grid or outside working hours.
        Ok(false)
    }
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}
