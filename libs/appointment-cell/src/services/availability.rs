use std::collections::HashSet;

use chrono::{NaiveTime, Timelike};

use crate::models::Appointment;

/// Candidate start times for one operating day at a fixed granularity.
///
/// A slot is offered only if it also ends by closing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrid {
    pub opening: NaiveTime,
    pub closing: NaiveTime,
    pub slot_minutes: u32,
}

impl SlotGrid {
    pub fn new(opening: NaiveTime, closing: NaiveTime, slot_minutes: u32) -> Self {
        Self {
            opening,
            closing,
            slot_minutes,
        }
    }

    pub fn slots(&self) -> Vec<NaiveTime> {
        if self.slot_minutes == 0 {
            return Vec::new();
        }

        let step = self.slot_minutes * 60;
        let close = self.closing.num_seconds_from_midnight();
        let mut start = self.opening.num_seconds_from_midnight();
        let mut slots = Vec::new();

        while start + step <= close {
            if let Some(time) = NaiveTime::from_num_seconds_from_midnight_opt(start, 0) {
                slots.push(time);
            }
            start += step;
        }

        slots
    }

    pub fn contains(&self, start_time: NaiveTime) -> bool {
        if self.slot_minutes == 0 || start_time.nanosecond() != 0 {
            return false;
        }

        let start = start_time.num_seconds_from_midnight();
        let opening = self.opening.num_seconds_from_midnight();
        let step = self.slot_minutes * 60;

        start >= opening
            && (start - opening) % step == 0
            && start + step <= self.closing.num_seconds_from_midnight()
    }

    /// Grid slots not occupied by any active appointment in `booked`.
    ///
    /// A snapshot only: nothing is locked, so the result can be stale by the
    /// time a booking arrives.
    pub fn free_slots(&self, booked: &[Appointment]) -> Vec<NaiveTime> {
        let taken: HashSet<NaiveTime> = booked
            .iter()
            .filter(|a| a.holds_slot())
            .map(|a| a.start_time)
            .collect();

        self.slots()
            .into_iter()
            .filter(|slot| !taken.contains(slot))
            .collect()
    }
}

impl Default for SlotGrid {
    fn default() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            30,
        )
    }
}
