//! # FEFO Stock Planning
//!
//! First-Expiring-First-Out consumption of inventory batches.
//!
//! ## Consumption Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Batches of one product in one branch (today = 2026-03-10)             │
//! │                                                                         │
//! │   #4  qty 0   exp 2026-03-12   ── skipped (empty)                      │
//! │   #7  qty 4   exp 2026-03-01   ── skipped (expired)                    │
//! │   #2  qty 3   exp 2026-04-01   ── 1st                                  │
//! │   #9  qty 5   exp 2026-09-30   ── 2nd                                  │
//! │   #1  qty 8   no expiry        ── last, after every dated batch        │
//! │                                                                         │
//! │  Request 6 → draw 3 from #2, 3 from #9                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Planning is pure: it decides the draws and fails without side effects
//! when the batches cannot cover the request. Applying the draws is the
//! database layer's job.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult};
use crate::types::InventoryBatch;

/// One decrement to apply to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDraw {
    pub batch_id: i64,
    /// Quantity the batch held when planned.
    pub quantity_before: i64,
    /// Units taken from this batch.
    pub take: i64,
}

impl BatchDraw {
    pub fn quantity_after(&self) -> i64 {
        self.quantity_before - self.take
    }
}

/// Sum of usable stock: quantity > 0 and expiry unset or not before `today`.
pub fn available_quantity(batches: &[InventoryBatch], today: NaiveDate) -> i64 {
    batches
        .iter()
        .filter(|b| b.is_usable(today))
        .map(|b| b.quantity.unwrap_or(0))
        .sum()
}

/// FEFO ordering: dated batches first by ascending expiry, undated last.
/// Ties fall back to the batch id so the plan is deterministic.
fn fefo_order(a: &InventoryBatch, b: &InventoryBatch) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// Plans the draws that consume `requested` units FEFO.
///
/// ## Errors
/// `CoreError::InsufficientStock` when usable stock is below `requested`.
/// No draw is returned in that case, so nothing is applied.
///
/// ## Example
/// ```rust
/// use chrono::{NaiveDate, Utc};
/// use pharma_core::fefo::plan_consumption;
/// use pharma_core::types::InventoryBatch;
///
/// let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
/// let batch = InventoryBatch {
///     id: 1, product_id: 1, branch_id: 1,
///     quantity: Some(5), expiry_date: None, created_at: Utc::now(),
/// };
/// let draws = plan_consumption("Panadol", &[batch], 2, today).unwrap();
/// assert_eq!(draws[0].quantity_after(), 3);
/// ```
pub fn plan_consumption(
    product_name: &str,
    batches: &[InventoryBatch],
    requested: i64,
    today: NaiveDate,
) -> CoreResult<Vec<BatchDraw>> {
    let available = available_quantity(batches, today);
    if requested > available {
        return Err(CoreError::InsufficientStock {
            product: product_name.to_string(),
            available,
            requested,
        });
    }

    let mut usable: Vec<&InventoryBatch> = batches.iter().filter(|b| b.is_usable(today)).collect();
    usable.sort_by(|a, b| fefo_order(a, b));

    let mut remaining = requested;
    let mut draws = Vec::new();

    for batch in usable {
        if remaining == 0 {
            break;
        }
        let held = batch.quantity.unwrap_or(0);
        let take = held.min(remaining);
        draws.push(BatchDraw {
            batch_id: batch.id,
            quantity_before: held,
            take,
        });
        remaining -= take;
    }

    Ok(draws)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn batch(id: i64, quantity: Option<i64>, expiry: Option<NaiveDate>) -> InventoryBatch {
        InventoryBatch {
            id,
            product_id: 10,
            branch_id: 1,
            quantity,
            expiry_date: expiry,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_ignores_expired_and_empty() {
        let today = day(10);
        let mut batches = vec![batch(1, Some(5), None), batch(2, Some(3), Some(day(20)))];
        assert_eq!(available_quantity(&batches, today), 8);

        batches.push(batch(3, Some(7), Some(day(9))));
        batches.push(batch(4, Some(0), Some(day(25))));
        batches.push(batch(5, None, None));
        assert_eq!(available_quantity(&batches, today), 8);
    }

    #[test]
    fn test_batch_expiring_today_is_available() {
        let today = day(10);
        assert_eq!(available_quantity(&[batch(1, Some(2), Some(today))], today), 2);
    }

    #[test]
    fn test_consumes_earliest_expiry_first() {
        let today = day(10);
        let batches = vec![
            batch(1, Some(8), None),
            batch(9, Some(5), Some(day(30))),
            batch(2, Some(3), Some(day(15))),
            batch(7, Some(4), Some(day(1))),
        ];

        let draws = plan_consumption("Amoxil", &batches, 6, today).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].batch_id, draws[0].take), (2, 3));
        assert_eq!((draws[1].batch_id, draws[1].take), (9, 3));
        assert_eq!(draws[1].quantity_after(), 2);
    }

    #[test]
    fn test_undated_batches_used_only_after_dated() {
        let today = day(10);
        let batches = vec![batch(1, Some(10), None), batch(2, Some(2), Some(day(28)))];

        let draws = plan_consumption("Zyrtec", &batches, 5, today).unwrap();
        assert_eq!(draws[0].batch_id, 2);
        assert_eq!(draws[0].take, 2);
        assert_eq!(draws[1].batch_id, 1);
        assert_eq!(draws[1].take, 3);
    }

    #[test]
    fn test_over_request_fails_without_draws() {
        let today = day(10);
        let batches = vec![batch(1, Some(2), None), batch(2, Some(1), Some(day(12)))];

        let err = plan_consumption("Zyrtec", &batches, 4, today).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientStock {
                product: "Zyrtec".to_string(),
                available: 3,
                requested: 4,
            }
        );
    }

    #[test]
    fn test_exact_quantity_exhausts_batch() {
        let today = day(10);
        let draws = plan_consumption("Panadol", &[batch(1, Some(5), None)], 5, today).unwrap();
        assert_eq!(draws[0].quantity_after(), 0);
    }
}
