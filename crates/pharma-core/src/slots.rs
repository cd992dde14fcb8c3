//! # Delivery Slot Capacity
//!
//! Rules for booking delivery windows per branch and day.
//!
//! ## Capacity Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Branch 3, 2026-03-10                                                   │
//! │                                                                         │
//! │  Slot            Non-urgent (max 9)     Urgent (max 1)                  │
//! │  ─────────────   ──────────────────     ──────────────                  │
//! │  08:00-12:00     ■■■■■■■■■  FULL        ■  taken                        │
//! │  12:00-16:00     ■■■■       5 left      □  free                         │
//! │  16:00-20:00     □          9 left      □  free                         │
//! │                                                                         │
//! │  Urgent = "deliver within the hour": the slot is derived from          │
//! │  now + 1h, preferring a slot that starts exactly then.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Counts come from the database on every call. Nothing here caches.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

use crate::error::RejectionReason;
use crate::types::Slot;

/// Non-urgent deliveries accepted per (branch, date, slot).
pub const NON_URGENT_SLOT_CAPACITY: i64 = 9;

/// Urgent deliveries accepted per (branch, slot, day).
pub const URGENT_SLOT_CAPACITY: i64 = 1;

/// Lead time for an urgent delivery.
pub const URGENT_LEAD_TIME_MINUTES: i64 = 60;

/// A bookable slot as shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SlotAvailability {
    pub slot_id: i64,
    pub name: String,
    #[ts(as = "String")]
    pub start_time: NaiveTime,
    #[ts(as = "String")]
    pub end_time: NaiveTime,
    pub booked: i64,
    pub remaining: i64,
}

/// Result of resolving an urgent booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrgentBooking {
    pub slot: Slot,
    /// The promised delivery time (now + lead time).
    pub delivery_time: NaiveTime,
}

/// Whether `t` falls in `[start, end)`.
pub fn slot_contains(slot: &Slot, t: NaiveTime) -> bool {
    slot.start_time <= t && t < slot.end_time
}

/// A same-day slot whose end has passed can no longer be booked.
pub fn slot_has_ended(slot: &Slot, date: NaiveDate, now: NaiveDateTime) -> bool {
    date < now.date() || (date == now.date() && slot.end_time <= now.time())
}

/// Finds the slot an urgent delivery placed at `now` belongs to.
///
/// Returns `None` when now + 1h crosses midnight or no window covers it.
pub fn urgent_slot(slots: &[Slot], now: NaiveDateTime) -> Option<&Slot> {
    let target = now + Duration::minutes(URGENT_LEAD_TIME_MINUTES);
    if target.date() != now.date() {
        return None;
    }
    let t = target.time();

    slots
        .iter()
        .find(|s| s.start_time == t)
        .or_else(|| slots.iter().find(|s| slot_contains(s, t)))
}

/// Number of urgent deliveries (by promised time) falling in `slot`.
pub fn urgent_bookings_in_slot(slot: &Slot, urgent_times: &[NaiveTime]) -> i64 {
    urgent_times.iter().filter(|t| slot_contains(slot, **t)).count() as i64
}

/// Checks that a non-urgent booking in `slot` on `date` is possible.
pub fn check_slot_bookable(
    slot: &Slot,
    booked: i64,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<(), RejectionReason> {
    if slot_has_ended(slot, date, now) {
        return Err(RejectionReason::SlotEnded);
    }
    if booked >= NON_URGENT_SLOT_CAPACITY {
        return Err(RejectionReason::SlotFull);
    }
    Ok(())
}

/// Resolves an urgent booking placed at `now`.
///
/// `urgent_times_today` holds the promised times of the branch's urgent
/// deliveries already booked for today.
pub fn resolve_urgent(
    slots: &[Slot],
    urgent_times_today: &[NaiveTime],
    now: NaiveDateTime,
) -> Result<UrgentBooking, RejectionReason> {
    let slot = urgent_slot(slots, now).ok_or(RejectionReason::UrgentUnavailable)?;

    if urgent_bookings_in_slot(slot, urgent_times_today) >= URGENT_SLOT_CAPACITY {
        return Err(RejectionReason::UrgentUnavailable);
    }

    Ok(UrgentBooking {
        slot: slot.clone(),
        delivery_time: (now + Duration::minutes(URGENT_LEAD_TIME_MINUTES)).time(),
    })
}

/// Lists the slots still bookable on `date`, with remaining capacity.
///
/// Full and already-ended slots are left out.
pub fn available_slots(
    slots: &[Slot],
    booked_by_slot: &HashMap<i64, i64>,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Vec<SlotAvailability> {
    slots
        .iter()
        .filter_map(|slot| {
            let booked = booked_by_slot.get(&slot.id).copied().unwrap_or(0);
            check_slot_bookable(slot, booked, date, now).ok()?;
            Some(SlotAvailability {
                slot_id: slot.id,
                name: slot.name.clone(),
                start_time: slot.start_time,
                end_time: slot.end_time,
                booked,
                remaining: NON_URGENT_SLOT_CAPACITY - booked,
            })
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
