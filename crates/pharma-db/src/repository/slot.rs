//! # Slot Repository
//!
//! Delivery windows and their live booking counts. Every check re-counts
//! shipping rows; the decision itself lives in `pharma_core::slots`.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use ts_rs::TS;

use crate::error::DbResult;
use pharma_core::slots::{self, SlotAvailability};
use pharma_core::Slot;

/// Urgent delivery offer for the next hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UrgentAvailability {
    pub available: bool,
    pub slot_id: Option<i64>,
    #[ts(as = "Option<String>")]
    pub delivery_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

pub(crate) async fn all_slots(conn: &mut SqliteConnection) -> DbResult<Vec<Slot>> {
    let slots = sqlx::query_as::<_, Slot>("SELECT id, name, start_time, end_time FROM slots ORDER BY start_time")
        .fetch_all(conn)
        .await?;
    Ok(slots)
}

/// Non-urgent bookings per slot for (branch, date).
pub(crate) async fn booked_by_slot(
    conn: &mut SqliteConnection,
    branch_id: i64,
    date: NaiveDate,
) -> DbResult<HashMap<i64, i64>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT slot_id, COUNT(*) FROM shippings
         WHERE branch_id = ?1 AND delivery_date = ?2 AND slot_id IS NOT NULL
               AND is_delivery = 1 AND is_urgent = 0
         GROUP BY slot_id",
    )
    .bind(branch_id)
    .bind(date)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Promised times of the branch's urgent deliveries on `date`.
pub(crate) async fn urgent_times(
    conn: &mut SqliteConnection,
    branch_id: i64,
    date: NaiveDate,
) -> DbResult<Vec<NaiveTime>> {
    let times: Vec<NaiveTime> = sqlx::query_scalar(
        "SELECT delivery_time FROM shippings
         WHERE branch_id = ?1 AND delivery_date = ?2 AND is_urgent = 1 AND delivery_time IS NOT NULL",
    )
    .bind(branch_id)
    .bind(date)
    .fetch_all(conn)
    .await?;
    Ok(times)
}

#[derive(Debug, Clone)]
pub struct SlotRepository {
    pool: SqlitePool,
}

impl SlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SlotRepository { pool }
    }

    pub async fn list(&self) -> DbResult<Vec<Slot>> {
        let mut conn = self.pool.acquire().await?;
        all_slots(&mut conn).await
    }

    /// Slots of `date` that still take a non-urgent booking.
    pub async fn available_slots(
        &self,
        branch_id: i64,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> DbResult<Vec<SlotAvailability>> {
        let mut conn = self.pool.acquire().await?;
        let slots = all_slots(&mut conn).await?;
        let booked = booked_by_slot(&mut conn, branch_id, date).await?;
        Ok(slots::available_slots(&slots, &booked, date, now))
    }

    pub async fn urgent_availability(&self, branch_id: i64, now: NaiveDateTime) -> DbResult<UrgentAvailability> {
        let mut conn = self.pool.acquire().await?;
        let slots = all_slots(&mut conn).await?;
        let taken = urgent_times(&mut conn, branch_id, now.date()).await?;

        Ok(match slots::resolve_urgent(&slots, &taken, now) {
            Ok(booking) => UrgentAvailability {
                available: true,
                slot_id: Some(booking.slot.id),
                delivery_time: Some(booking.delivery_time),
                reason: None,
            },
            Err(reason) => UrgentAvailability {
                available: false,
                slot_id: None,
                delivery_time: None,
                reason: Some(reason.to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, Fixture};

    fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_hms_opt(h, m, 0).unwrap()
    }

    async fn book(db: &crate::Database, branch: i64, date: NaiveDate, slot: Option<i64>, urgent_at: Option<NaiveTime>) {
        sqlx::query(
            "INSERT INTO shippings (branch_id, is_delivery, is_urgent, slot_id, delivery_date, delivery_time)
             VALUES (?1, 1, ?2, ?3, ?4, ?5)",
        )
        .bind(branch)
        .bind(urgent_at.is_some())
        .bind(slot)
        .bind(date)
        .bind(urgent_at)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_full_and_ended_slots_excluded() {
        let Fixture { db, today, branch, other_branch, .. } = fixture().await;
        for _ in 0..9 {
            book(&db, branch, today, Some(3), None).await;
        }
        book(&db, other_branch, today, Some(2), None).await;

        let slots = db.slots().available_slots(branch, today, at(today, 13, 0)).await.unwrap();
        let ids: Vec<i64> = slots.iter().map(|s| s.slot_id).collect();
        // Morning ended, Evening full
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(slots[0].remaining, 9);
    }

    #[tokio::test]
    async fn test_urgent_taken_once_per_slot() {
        let Fixture { db, today, branch, .. } = fixture().await;
        let now = at(today, 10, 0);

        let offer = db.slots().urgent_availability(branch, now).await.unwrap();
        assert!(offer.available);
        assert_eq!(offer.slot_id, Some(1));

        book(&db, branch, today, None, offer.delivery_time).await;
        let again = db.slots().urgent_availability(branch, now).await.unwrap();
        assert!(!again.available);

        let late = db.slots().urgent_availability(branch, at(today, 23, 30)).await.unwrap();
        assert!(!late.available);
    }
}
