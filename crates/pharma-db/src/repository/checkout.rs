//! # Checkout Repository
//!
//! Turns a user's cart into an order inside ONE transaction.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  place_order(user, request, payment_verified, now)                     │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │   ├── ReceivedCart          cart lines + current prices                │
//! │   ├── PrescriptionResolved  approved id checked / upload accepted      │
//! │   ├── ShippingResolved      branch, date, slot or urgent booking       │
//! │   ├── InventoryValidated    every line covered, payment completed      │
//! │   └── Committed                                                        │
//! │         address? → prescription? → shipping → payment → order          │
//! │         → product_orders → FEFO decrement → cart cleared → logs        │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  A rejection at any stage returns before the first INSERT and the      │
//! │  transaction is dropped: no row from this request survives.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::cart::{checkout_lines, clear_cart};
use crate::repository::inventory::{available_in_branch, consume_fefo};
use crate::repository::log;
use crate::repository::prescription::{approvals_for, fetch_prescription};
use crate::repository::slot::{all_slots, booked_by_slot, urgent_times};
use crate::repository::user::{branch_for_city, fetch_address, insert_address};
use pharma_core::checkout::{
    compute_totals, find_shortfalls, resolve_coverage, split_prescribed, validate_approved_prescription,
    validate_delivery_date, AddressInput, CheckoutLine, CheckoutRequest, CheckoutStage, CheckoutTotals,
    FulfillmentMode, PrescriptionCoverage, PrescriptionUpload,
};
use pharma_core::slots::{check_slot_bookable, resolve_urgent};
use pharma_core::{Address, LogType, OrderStatus, PaymentMethod, RejectionReason, User};

/// Result of a successful checkout.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PlacedOrder {
    pub order_id: i64,
    pub shipping_id: i64,
    pub payment_id: i64,
    pub branch_id: i64,
    pub status: OrderStatus,
    pub totals: CheckoutTotals,
    /// Prescription uploaded with the order, pending review.
    pub prescription_id: Option<i64>,
}

/// Where a delivery goes.
enum Destination<'a> {
    Saved(Address),
    Typed(&'a AddressInput),
}

impl Destination<'_> {
    fn city_id(&self) -> Option<i64> {
        match self {
            Destination::Saved(address) => Some(address.city_id),
            Destination::Typed(input) => input.city_id,
        }
    }
}

/// Shipping details settled before anything is written.
struct ShippingPlan<'a> {
    branch_id: i64,
    destination: Option<Destination<'a>>,
    is_urgent: bool,
    slot_id: Option<i64>,
    delivery_date: Option<NaiveDate>,
    delivery_time: Option<NaiveTime>,
}

/// Tracks the stage reached so a rejection names where it happened.
struct Progress {
    stage: CheckoutStage,
}

impl Progress {
    fn advance(&mut self) {
        self.stage = self.stage.next();
    }

    fn reject(&self, reason: RejectionReason) -> DbError {
        debug!(stage = %self.stage, code = reason.code(), "Checkout rejected");
        DbError::rejected(self.stage, reason)
    }
}

async fn resolve_destination<'a>(
    conn: &mut SqliteConnection,
    user: &User,
    request: &'a CheckoutRequest,
) -> DbResult<Option<Destination<'a>>> {
    if request.mode != FulfillmentMode::Delivery {
        return Ok(None);
    }
    if request.use_profile_address {
        return match user.profile_address_id {
            Some(id) => Ok(fetch_address(conn, id).await?.map(Destination::Saved)),
            None => Ok(None),
        };
    }
    Ok(request
        .address
        .as_ref()
        .filter(|a| a.is_complete())
        .map(Destination::Typed))
}

#[derive(Debug, Clone)]
pub struct CheckoutRepository {
    pool: SqlitePool,
}

impl CheckoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CheckoutRepository { pool }
    }

    /// Places an order from the user's cart.
    ///
    /// `payment_verified` is the payment gateway's answer for the request's
    /// online session; it is ignored for cash.
    pub async fn place_order(
        &self,
        user: &User,
        request: &CheckoutRequest,
        payment_verified: bool,
        now: NaiveDateTime,
    ) -> DbResult<PlacedOrder> {
        let today = now.date();
        let mut progress = Progress {
            stage: CheckoutStage::ReceivedCart,
        };

        let mut tx = self.pool.begin().await?;

        // ---------------------------------------------------------------------
        // ReceivedCart
        // ---------------------------------------------------------------------
        let lines = checkout_lines(&mut tx, user.id).await?;
        if lines.is_empty() {
            return Err(progress.reject(RejectionReason::EmptyCart));
        }
        let (prescribed, _) = split_prescribed(&lines);
        let destination = resolve_destination(&mut tx, user, request).await?;

        let coverage = resolve_coverage(!prescribed.is_empty(), request, destination.is_some())
            .map_err(|r| progress.reject(r))?;

        if let PrescriptionCoverage::Approved(id) = coverage {
            let prescription = fetch_prescription(&mut tx, id)
                .await?
                .ok_or_else(|| progress.reject(RejectionReason::PrescriptionNotFound))?;
            let approvals = approvals_for(&mut tx, id).await?;
            validate_approved_prescription(
                &prescription,
                &approvals,
                user.id,
                user.has_health_profile,
                &prescribed,
                today,
            )
            .map_err(|r| progress.reject(r))?;
        }
        progress.advance();

        // ---------------------------------------------------------------------
        // PrescriptionResolved: fulfilling branch and booking
        // ---------------------------------------------------------------------
        let shipping = self
            .resolve_shipping(&mut tx, request, destination, &progress, now)
            .await?;
        progress.advance();

        // ---------------------------------------------------------------------
        // ShippingResolved: stock and payment
        // ---------------------------------------------------------------------
        let mut available = HashMap::new();
        for line in &lines {
            let qty = available_in_branch(&mut tx, line.product_id, shipping.branch_id, today).await?;
            available.insert(line.product_id, qty);
        }
        let shortfalls = find_shortfalls(&lines, &available);
        if !shortfalls.is_empty() {
            return Err(progress.reject(RejectionReason::ProductsUnavailable(shortfalls)));
        }

        if request.payment_method == PaymentMethod::Online
            && (!payment_verified || request.payment_session_id.is_none())
        {
            return Err(progress.reject(RejectionReason::PaymentNotCompleted));
        }

        let totals = compute_totals(&lines, request.mode == FulfillmentMode::Delivery);
        progress.advance();

        // ---------------------------------------------------------------------
        // InventoryValidated: write everything
        // ---------------------------------------------------------------------
        let placed = self
            .commit_order(&mut tx, user, request, &lines, &coverage, shipping, totals, today)
            .await?;
        tx.commit().await?;

        info!(
            order_id = placed.order_id,
            user_id = user.id,
            branch_id = placed.branch_id,
            total = %placed.totals.total,
            "Order placed"
        );
        Ok(placed)
    }

    async fn resolve_shipping<'a>(
        &self,
        conn: &mut SqliteConnection,
        request: &CheckoutRequest,
        destination: Option<Destination<'a>>,
        progress: &Progress,
        now: NaiveDateTime,
    ) -> DbResult<ShippingPlan<'a>> {
        if request.mode == FulfillmentMode::Pickup {
            let branch_id = request
                .branch_id
                .ok_or_else(|| progress.reject(RejectionReason::BranchRequired))?;
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM branches WHERE id = ?1")
                .bind(branch_id)
                .fetch_optional(&mut *conn)
                .await?;
            if exists.is_none() {
                return Err(DbError::not_found("Branch", branch_id.to_string()));
            }
            return Ok(ShippingPlan {
                branch_id,
                destination: None,
                is_urgent: false,
                slot_id: None,
                delivery_date: None,
                delivery_time: None,
            });
        }

        let city_id = destination
            .as_ref()
            .and_then(Destination::city_id)
            .ok_or_else(|| progress.reject(RejectionReason::AddressRequired))?;
        let branch_id = branch_for_city(&mut *conn, city_id)
            .await?
            .ok_or_else(|| progress.reject(RejectionReason::NoBranchForCity))?;

        let slots = all_slots(&mut *conn).await?;

        if request.is_urgent {
            let taken = urgent_times(&mut *conn, branch_id, now.date()).await?;
            let booking = resolve_urgent(&slots, &taken, now).map_err(|r| progress.reject(r))?;
            return Ok(ShippingPlan {
                branch_id,
                destination,
                is_urgent: true,
                slot_id: None,
                delivery_date: Some(now.date()),
                delivery_time: Some(booking.delivery_time),
            });
        }

        let date = request
            .delivery_date
            .ok_or_else(|| progress.reject(RejectionReason::InvalidDeliveryDate))?;
        validate_delivery_date(date, now.date()).map_err(|r| progress.reject(r))?;

        let slot_id = request
            .slot_id
            .ok_or_else(|| progress.reject(RejectionReason::SlotRequired))?;
        let slot = slots
            .iter()
            .find(|s| s.id == slot_id)
            .ok_or_else(|| progress.reject(RejectionReason::SlotNotFound))?;

        let booked = booked_by_slot(&mut *conn, branch_id, date)
            .await?
            .get(&slot_id)
            .copied()
            .unwrap_or(0);
        check_slot_bookable(slot, booked, date, now).map_err(|r| progress.reject(r))?;

        Ok(ShippingPlan {
            branch_id,
            destination,
            is_urgent: false,
            slot_id: Some(slot_id),
            delivery_date: Some(date),
            delivery_time: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_order(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
        request: &CheckoutRequest,
        lines: &[CheckoutLine],
        coverage: &PrescriptionCoverage,
        shipping: ShippingPlan<'_>,
        totals: CheckoutTotals,
        today: NaiveDate,
    ) -> DbResult<PlacedOrder> {
        let created_at = Utc::now();

        let address_id = match &shipping.destination {
            Some(Destination::Saved(address)) => Some(address.id),
            Some(Destination::Typed(input)) => Some(insert_address(&mut *conn, user.id, input).await?),
            None => None,
        };

        let uploaded = match (coverage, &request.prescription_upload) {
            (PrescriptionCoverage::Upload, Some(upload)) => Some(
                insert_uploaded_prescription(&mut *conn, user.id, upload, shipping.branch_id, address_id).await?,
            ),
            _ => None,
        };
        let prescription_id = match coverage {
            PrescriptionCoverage::Approved(id) => Some(*id),
            PrescriptionCoverage::Upload => uploaded,
            PrescriptionCoverage::NotNeeded => None,
        };

        let shipping_id: i64 = sqlx::query_scalar(
            "INSERT INTO shippings (branch_id, is_delivery, is_urgent, address_id, slot_id,
                                    delivery_date, delivery_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING id",
        )
        .bind(shipping.branch_id)
        .bind(request.mode == FulfillmentMode::Delivery)
        .bind(shipping.is_urgent)
        .bind(address_id)
        .bind(shipping.slot_id)
        .bind(shipping.delivery_date)
        .bind(shipping.delivery_time)
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await?;

        let session_id = match request.payment_method {
            PaymentMethod::Online => request.payment_session_id.as_deref(),
            PaymentMethod::Cash => None,
        };
        let payment_id: i64 = sqlx::query_scalar(
            "INSERT INTO payments (method, amount_fils, is_successful, session_id, created_at)
             VALUES (?1, ?2, 1, ?3, ?4) RETURNING id",
        )
        .bind(request.payment_method)
        .bind(totals.total.fils())
        .bind(session_id)
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await?;

        let order_id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (user_id, shipping_id, payment_id, status, total_fils, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
        )
        .bind(user.id)
        .bind(shipping_id)
        .bind(payment_id)
        .bind(OrderStatus::Pending)
        .bind(totals.total.fils())
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await?;

        for line in lines {
            sqlx::query(
                "INSERT INTO product_orders (order_id, product_id, quantity, unit_price_fils, prescription_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(order_id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price_fils)
            .bind(if line.requires_prescription { prescription_id } else { None })
            .execute(&mut *conn)
            .await?;

            consume_fefo(
                &mut *conn,
                line.product_id,
                &line.product_name,
                shipping.branch_id,
                line.quantity,
                today,
            )
            .await
            .inspect_err(|e| warn!(order_id, product_id = line.product_id, error = %e, "FEFO consumption failed"))?;

            if line.is_controlled {
                log::append(
                    &mut *conn,
                    LogType::ControlledDispensation,
                    Some(user.id),
                    format!(
                        "Dispensed {} x {} on order {} (prescription {})",
                        line.quantity,
                        line.product_name,
                        order_id,
                        prescription_id.map_or_else(|| "none".to_string(), |id| id.to_string())
                    ),
                )
                .await?;
            }
        }

        clear_cart(&mut *conn, user.id).await?;

        log::append(
            &mut *conn,
            LogType::Checkout,
            Some(user.id),
            format!(
                "Order {} placed: {} lines, total {} ({})",
                order_id,
                lines.len(),
                totals.total,
                if shipping.is_urgent {
                    "urgent delivery"
                } else if request.mode == FulfillmentMode::Delivery {
                    "delivery"
                } else {
                    "pickup"
                }
            ),
        )
        .await?;

        Ok(PlacedOrder {
            order_id,
            shipping_id,
            payment_id,
            branch_id: shipping.branch_id,
            status: OrderStatus::Pending,
            totals,
            prescription_id: uploaded,
        })
    }
}

async fn insert_uploaded_prescription(
    conn: &mut SqliteConnection,
    user_id: i64,
    upload: &PrescriptionUpload,
    branch_id: i64,
    address_id: Option<i64>,
) -> DbResult<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO prescriptions (user_id, name, status, is_health, document, cpr_document,
                                    is_delivery, branch_id, address_id, created_at)
         VALUES (?1, ?2, 'Pending', 0, ?3, ?4, 1, ?5, ?6, ?7) RETURNING id",
    )
    .bind(user_id)
    .bind(upload.name.trim())
    .bind(upload.document.as_deref().unwrap_or_default())
    .bind(upload.cpr_document.as_deref().unwrap_or_default())
    .bind(branch_id)
    .bind(address_id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    log::append(
        conn,
        LogType::Create,
        Some(user_id),
        format!("Prescription {} uploaded at checkout", id),
    )
    .await?;
    Ok(id)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_batch, add_to_cart, count, fixture, Fixture};
    use chrono::Duration;
    use pharma_core::CoreError;

    fn pickup(branch: i64) -> CheckoutRequest {
        CheckoutRequest {
            mode: FulfillmentMode::Pickup,
            branch_id: Some(branch),
            use_profile_address: false,
            address: None,
            is_urgent: false,
            delivery_date: None,
            slot_id: None,
            payment_method: PaymentMethod::Cash,
            payment_session_id: None,
            approved_prescription_id: None,
            prescription_upload: None,
        }
    }

    fn delivery(date: NaiveDate, slot: i64) -> CheckoutRequest {
        CheckoutRequest {
            mode: FulfillmentMode::Delivery,
            branch_id: None,
            use_profile_address: true,
            delivery_date: Some(date),
            slot_id: Some(slot),
            ..pickup(0)
        }
    }

    fn at(date: NaiveDate, h: u32) -> NaiveDateTime {
        date.and_hms_opt(h, 0, 0).unwrap()
    }

    fn reason(err: DbError) -> RejectionReason {
        match err {
            DbError::Rule(CoreError::CheckoutRejected { reason, .. }) => reason,
            other => panic!("expected a checkout rejection, got {other:?}"),
        }
    }

    async fn assert_nothing_written(db: &crate::Database) {
        for table in ["orders", "shippings", "payments", "product_orders", "prescriptions"] {
            assert_eq!(count(db, table).await, 0, "{table} should be empty");
        }
    }

    async fn book_slot(db: &crate::Database, branch: i64, date: NaiveDate, slot: i64, times: usize) {
        for _ in 0..times {
            sqlx::query(
                "INSERT INTO shippings (branch_id, is_delivery, is_urgent, slot_id, delivery_date)
                 VALUES (?1, 1, 0, ?2, ?3)",
            )
            .bind(branch)
            .bind(slot)
            .bind(date)
            .execute(db.pool())
            .await
            .unwrap();
        }
    }

    async fn quantity(db: &crate::Database, batch: i64) -> i64 {
        sqlx::query_scalar("SELECT quantity FROM inventory WHERE id = ?1")
            .bind(batch)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pickup_order_decrements_stock_and_clears_cart() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        let batch = add_batch(&db, product, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, product, 2).await;

        let placed = db
            .checkout()
            .place_order(&customer, &pickup(branch), false, at(today, 10))
            .await
            .unwrap();

        assert!(placed.order_id > 0);
        assert_eq!(placed.totals.total.fils(), 3000);
        assert_eq!(placed.totals.delivery_fee.fils(), 0);
        assert_eq!(quantity(&db, batch).await, 3);
        assert_eq!(count(&db, "cart_items").await, 0);
        assert_eq!(count(&db, "product_orders").await, 1);

        let logs = db.logs().by_type(LogType::Checkout).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_prescribed_item_without_prescription_rejected() {
        let Fixture { db, today, customer, prescribed, branch, .. } = fixture().await;
        let batch = add_batch(&db, prescribed, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, prescribed, 1).await;

        let err = db
            .checkout()
            .place_order(&customer, &pickup(branch), false, at(today, 10))
            .await
            .unwrap_err();

        assert_eq!(
            reason(err).to_string(),
            "Approved prescription is required for prescribed items"
        );
        assert_nothing_written(&db).await;
        assert_eq!(quantity(&db, batch).await, 5);
        assert_eq!(count(&db, "cart_items").await, 1);
    }

    #[tokio::test]
    async fn test_full_slot_rejected() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        add_batch(&db, product, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, product, 1).await;
        book_slot(&db, branch, today, 4, 9).await;

        let err = db
            .checkout()
            .place_order(&customer, &delivery(today, 4), false, at(today, 9))
            .await
            .unwrap_err();

        assert_eq!(reason(err).to_string(), "Selected delivery slot is full");
        assert_eq!(count(&db, "orders").await, 0);
        assert_eq!(count(&db, "shippings").await, 9);
    }

    #[tokio::test]
    async fn test_ninth_booking_accepted_tenth_rejected() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        add_batch(&db, product, branch, Some(5), None).await;
        let date = today + Duration::days(2);
        book_slot(&db, branch, date, 2, 8).await;

        add_to_cart(&db, customer.id, product, 1).await;
        let placed = db
            .checkout()
            .place_order(&customer, &delivery(date, 2), false, at(today, 9))
            .await
            .unwrap();
        assert_eq!(placed.branch_id, branch);
        assert_eq!(placed.totals.total.fils(), 1500 + 1000);

        add_to_cart(&db, customer.id, product, 1).await;
        let err = db
            .checkout()
            .place_order(&customer, &delivery(date, 2), false, at(today, 9))
            .await
            .unwrap_err();
        assert_eq!(reason(err), RejectionReason::SlotFull);
    }

    #[tokio::test]
    async fn test_second_urgent_delivery_in_slot_rejected() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        add_batch(&db, product, branch, Some(5), None).await;
        let mut request = delivery(today, 0);
        request.is_urgent = true;
        request.slot_id = None;
        request.delivery_date = None;

        add_to_cart(&db, customer.id, product, 1).await;
        db.checkout()
            .place_order(&customer, &request, false, at(today, 13))
            .await
            .unwrap();

        add_to_cart(&db, customer.id, product, 1).await;
        let err = db
            .checkout()
            .place_order(&customer, &request, false, at(today, 13))
            .await
            .unwrap_err();
        assert_eq!(reason(err), RejectionReason::UrgentUnavailable);
        assert_eq!(count(&db, "orders").await, 1);
    }

    #[tokio::test]
    async fn test_shortfall_names_products_and_writes_nothing() {
        let Fixture { db, today, customer, product, controlled, branch, other_branch, .. } = fixture().await;
        let batch = add_batch(&db, product, branch, Some(5), None).await;
        add_batch(&db, controlled, other_branch, Some(5), None).await;
        add_to_cart(&db, customer.id, product, 2).await;

        let mut request = pickup(branch);
        request.approved_prescription_id = None;
        sqlx::query("UPDATE products SET requires_prescription = 0 WHERE id = ?1")
            .bind(controlled)
            .execute(db.pool())
            .await
            .unwrap();
        add_to_cart(&db, customer.id, controlled, 1).await;

        let err = db
            .checkout()
            .place_order(&customer, &request, false, at(today, 10))
            .await
            .unwrap_err();

        let reason = reason(err);
        assert_eq!(reason.unavailable_products(), Some(&["Tramadol".to_string()][..]));
        assert_nothing_written(&db).await;
        assert_eq!(quantity(&db, batch).await, 5);
    }

    #[tokio::test]
    async fn test_unmapped_city_rejected() {
        let Fixture { db, today, customer, product, branch, unmapped_city, .. } = fixture().await;
        add_batch(&db, product, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, product, 1).await;

        let mut request = delivery(today, 4);
        request.use_profile_address = false;
        request.address = Some(AddressInput {
            city_id: Some(unmapped_city),
            block: "1".into(),
            road: "2".into(),
            building: "3".into(),
        });

        let err = db
            .checkout()
            .place_order(&customer, &request, false, at(today, 9))
            .await
            .unwrap_err();
        assert_eq!(reason(err), RejectionReason::NoBranchForCity);
        assert_eq!(count(&db, "addresses").await, 1);
    }

    #[tokio::test]
    async fn test_online_payment_must_be_verified() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        add_batch(&db, product, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, product, 1).await;

        let mut request = pickup(branch);
        request.payment_method = PaymentMethod::Online;
        request.payment_session_id = Some("cs_test_123".into());

        let err = db
            .checkout()
            .place_order(&customer, &request, false, at(today, 10))
            .await
            .unwrap_err();
        assert_eq!(reason(err), RejectionReason::PaymentNotCompleted);

        let placed = db
            .checkout()
            .place_order(&customer, &request, true, at(today, 10))
            .await
            .unwrap();
        let session: Option<String> = sqlx::query_scalar("SELECT session_id FROM payments WHERE id = ?1")
            .bind(placed.payment_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(session.as_deref(), Some("cs_test_123"));
    }

    #[tokio::test]
    async fn test_approved_prescription_covers_line() {
        let Fixture { db, today, customer, pharmacist, prescribed, branch, .. } = fixture().await;
        add_batch(&db, prescribed, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, prescribed, 2).await;

        let rx: i64 = sqlx::query_scalar(
            "INSERT INTO prescriptions (user_id, name, status, document, cpr_document)
             VALUES (?1, 'Dr. Salman', 'Approved', x'01', x'02') RETURNING id",
        )
        .bind(customer.id)
        .fetch_one(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO approvals (prescription_id, pharmacist_id, product_id, product_name, quantity, dosage, expiry_date)
             VALUES (?1, ?2, ?3, 'Amoxicillin', 2, '500mg twice daily', ?4)",
        )
        .bind(rx)
        .bind(pharmacist.id)
        .bind(prescribed)
        .bind(today + Duration::days(30))
        .execute(db.pool())
        .await
        .unwrap();

        let mut request = pickup(branch);
        request.approved_prescription_id = Some(rx);
        db.checkout()
            .place_order(&customer, &request, false, at(today, 10))
            .await
            .unwrap();

        let linked: Option<i64> = sqlx::query_scalar("SELECT prescription_id FROM product_orders")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(linked, Some(rx));
    }

    #[tokio::test]
    async fn test_upload_creates_pending_prescription() {
        let Fixture { db, today, customer, prescribed, branch, .. } = fixture().await;
        add_batch(&db, prescribed, branch, Some(5), None).await;
        add_to_cart(&db, customer.id, prescribed, 1).await;

        let mut request = delivery(today + Duration::days(1), 1);
        request.prescription_upload = Some(PrescriptionUpload {
            name: "Clinic note".into(),
            document: Some(vec![0x25, 0x50, 0x44, 0x46]),
            cpr_document: Some(vec![0xFF, 0xD8]),
        });

        let placed = db
            .checkout()
            .place_order(&customer, &request, false, at(today, 9))
            .await
            .unwrap();
        let rx = placed.prescription_id.unwrap();
        let status: String = sqlx::query_scalar("SELECT status FROM prescriptions WHERE id = ?1")
            .bind(rx)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(status, "Pending");
    }

    #[tokio::test]
    async fn test_controlled_line_logs_dispensation() {
        let Fixture { db, today, customer, controlled, branch, .. } = fixture().await;
        add_batch(&db, controlled, branch, Some(5), None).await;
        sqlx::query("UPDATE products SET requires_prescription = 0 WHERE id = ?1")
            .bind(controlled)
            .execute(db.pool())
            .await
            .unwrap();
        add_to_cart(&db, customer.id, controlled, 1).await;

        db.checkout()
            .place_order(&customer, &pickup(branch), false, at(today, 10))
            .await
            .unwrap();

        let logs = db.logs().by_type(LogType::ControlledDispensation).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].description.contains("Tramadol"));
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let Fixture { db, today, customer, branch, .. } = fixture().await;
        let err = db
            .checkout()
            .place_order(&customer, &pickup(branch), false, at(today, 10))
            .await
            .unwrap_err();
        assert_eq!(reason(err), RejectionReason::EmptyCart);
    }

    #[tokio::test]
    async fn test_stock_changed_mid_commit_rolls_back_everything() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        let soon = add_batch(&db, product, branch, Some(2), Some(today + Duration::days(5))).await;
        let late = add_batch(&db, product, branch, Some(4), Some(today + Duration::days(60))).await;
        add_to_cart(&db, customer.id, product, 5).await;

        // Once the first batch is decremented, a concurrent sale takes most of
        // the second one, after the draws were planned.
        sqlx::query(&format!(
            "CREATE TRIGGER concurrent_sale AFTER UPDATE OF quantity ON inventory
             WHEN NEW.id = {soon}
             BEGIN UPDATE inventory SET quantity = 1 WHERE id = {late}; END"
        ))
        .execute(db.pool())
        .await
        .unwrap();

        let err = db
            .checkout()
            .place_order(&customer, &pickup(branch), false, at(today, 10))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::TransactionFailed(_)), "got {err:?}");
        assert_nothing_written(&db).await;
        assert_eq!(quantity(&db, soon).await, 2);
        assert_eq!(quantity(&db, late).await, 4);
        assert_eq!(count(&db, "cart_items").await, 1);
        assert!(db.logs().by_type(LogType::Checkout).await.unwrap().is_empty());
    }
}
