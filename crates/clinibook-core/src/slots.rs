//! Candidate slot generation from working periods.
//!
//! Turns a provider's working period for a date into a lazy, finite,
//! restartable sequence of fixed-length slots. No side effects, no I/O.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::model::{Slot, WorkingPeriod};

/// Iterator over candidate slots within `[period_start, period_end)`.
///
/// Steps from `period_start` by the granularity and stops once the next
/// slot's end would pass `period_end`. `Clone` restarts the sequence from
/// wherever the clone was taken.
#[derive(Debug, Clone)]
pub struct SlotIter {
    cursor: DateTime<Utc>,
    period_end: DateTime<Utc>,
    duration: Duration,
    step: Duration,
}

impl SlotIter {
    pub fn new(
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        duration_min: u32,
        granularity_min: u32,
    ) -> Self {
        Self {
            cursor: period_start,
            period_end,
            duration: Duration::minutes(i64::from(duration_min)),
            step: Duration::minutes(i64::from(granularity_min)),
        }
    }
}

impl Iterator for SlotIter {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        // Zero-length steps would never terminate.
        if self.step <= Duration::zero() || self.duration <= Duration::zero() {
            return None;
        }
        let end = self.cursor + self.duration;
        if end > self.period_end {
            return None;
        }
        let slot = Slot::new(self.cursor, end);
        self.cursor += self.step;
        Some(slot)
    }
}

/// Bookable slots for one working period on `date`: the granularity equals
/// the requested duration, so consecutive slots never overlap.
///
/// A period shorter than the duration yields an empty sequence, not an
/// error.
pub fn slots_in_period(date: NaiveDate, period: &WorkingPeriod, duration_min: u32) -> SlotIter {
    let start = date.and_time(period.start).and_utc();
    let end = date.and_time(period.end).and_utc();
    SlotIter::new(start, end, duration_min, duration_min)
}
