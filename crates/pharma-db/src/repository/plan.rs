//! # Prescription Plan Repository
//!
//! Recurring fulfilment of an approved health prescription.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Approval (health, Approved, not expired, no plan yet)                 │
//! │       │ create                                                          │
//! │       ▼                                                                 │
//! │  Plan Ongoing ── own Shipping (pickup branch or city's branch)         │
//! │       │          total = price × qty (+ delivery fee)                  │
//! │       │          next_reminder_date = today + interval                  │
//! │       │                                                                 │
//! │       ├── update: branch + total recomputed from approval and city     │
//! │       ├── reminder job: email, next_reminder_date += interval          │
//! │       ├── prescription expired: plan becomes Expired                    │
//! │       └── delete: plan, its shipping, and a non-profile address        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Plans check that the branch holds the approved quantity but do not
//! reserve or decrement stock.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::inventory::available_in_branch;
use crate::repository::log;
use crate::repository::prescription::{delivery_branch, fetch_approval, fetch_prescription, sweep_expired};
use pharma_core::checkout::AddressInput;
use pharma_core::prescription::{check_plan_eligible, next_reminder, plan_total};
use pharma_core::{
    Approval, CoreError, LogType, Money, PlanStatus, PrescriptionPlan, PrescriptionStatus, User,
};

const PLAN_COLUMNS: &str =
    "id, user_id, approval_id, shipping_id, status, total_fils, next_reminder_date, created_at";

/// Body of `POST/PUT /api/PrescriptionPlan`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PlanRequest {
    pub approval_id: i64,
    /// Pickup branch; ignored when a delivery address is given.
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub use_profile_address: bool,
    pub address: Option<AddressInput>,
}

impl PlanRequest {
    fn wants_delivery(&self) -> bool {
        self.use_profile_address || self.address.is_some()
    }
}

/// A plan whose reminder is due.
#[derive(Debug, Clone, FromRow)]
pub struct PlanReminder {
    pub plan_id: i64,
    pub user_id: i64,
    pub email: String,
    pub product_name: String,
    pub total_fils: i64,
    pub next_reminder_date: NaiveDate,
}

#[derive(FromRow)]
struct ShippingTarget {
    branch_id: i64,
    address_id: Option<i64>,
}

/// Branch and address for a plan's shipping.
async fn resolve_target(conn: &mut SqliteConnection, user: &User, req: &PlanRequest) -> DbResult<ShippingTarget> {
    if req.wants_delivery() {
        let (branch_id, address_id) = delivery_branch(&mut *conn, user, req.use_profile_address, req.address.as_ref())
            .await?
            .ok_or_else(|| CoreError::PlanNotAllowed("a complete delivery address is required".to_string()))?;
        return Ok(ShippingTarget {
            branch_id,
            address_id: Some(address_id),
        });
    }
    let branch_id = req
        .branch_id
        .ok_or_else(|| CoreError::PlanNotAllowed("a pickup branch or delivery address is required".to_string()))?;
    Ok(ShippingTarget {
        branch_id,
        address_id: None,
    })
}

/// Approval, checked for ownership and eligibility, with its product price.
async fn eligible_approval(
    conn: &mut SqliteConnection,
    user_id: i64,
    approval_id: i64,
    today: NaiveDate,
) -> DbResult<(Approval, Money)> {
    let approval = fetch_approval(&mut *conn, approval_id)
        .await?
        .ok_or_else(|| DbError::not_found("Approval", approval_id.to_string()))?;
    let prescription = fetch_prescription(&mut *conn, approval.prescription_id)
        .await?
        .filter(|p| p.user_id == user_id)
        .ok_or_else(|| DbError::not_found("Approval", approval_id.to_string()))?;

    check_plan_eligible(prescription.status, prescription.is_health, &approval, today)?;

    let price: i64 = sqlx::query_scalar("SELECT price_fils FROM products WHERE id = ?1")
        .bind(approval.product_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", approval.product_id.to_string()))?;
    Ok((approval, Money::from_fils(price)))
}

async fn ensure_branch_stock(
    conn: &mut SqliteConnection,
    approval: &Approval,
    branch_id: i64,
    today: NaiveDate,
) -> DbResult<()> {
    let available = available_in_branch(conn, approval.product_id, branch_id, today).await?;
    if available < approval.quantity {
        return Err(CoreError::InsufficientStock {
            product: approval.product_name.clone(),
            available,
            requested: approval.quantity,
        }
        .into());
    }
    Ok(())
}

/// Removes an address unless it is someone's saved profile address.
async fn drop_transient_address(conn: &mut SqliteConnection, address_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM addresses WHERE id = ?1 AND is_profile = 0")
        .bind(address_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PlanRepository {
    pool: SqlitePool,
}

impl PlanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PlanRepository { pool }
    }

    async fn owned_plan(conn: &mut SqliteConnection, user_id: i64, plan_id: i64) -> DbResult<PrescriptionPlan> {
        sqlx::query_as::<_, PrescriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM prescription_plans WHERE id = ?1 AND user_id = ?2"
        ))
        .bind(plan_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DbError::not_found("PrescriptionPlan", plan_id.to_string()))
    }

    /// Approvals that can back a new plan, after the expiry sweep.
    pub async fn eligible_approvals(&self, user_id: i64, today: NaiveDate) -> DbResult<Vec<Approval>> {
        let mut tx = self.pool.begin().await?;
        sweep_expired(&mut tx, Some(user_id), today).await?;

        let rows: Vec<(i64, PrescriptionStatus, bool)> = sqlx::query_as(
            "SELECT a.id, p.status, p.is_health
             FROM approvals a JOIN prescriptions p ON p.id = a.prescription_id
             WHERE p.user_id = ?1
               AND NOT EXISTS (SELECT 1 FROM prescription_plans pp WHERE pp.approval_id = a.id)
             ORDER BY a.created_at DESC, a.id DESC",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut eligible = Vec::new();
        for (approval_id, status, is_health) in rows {
            if let Some(approval) = fetch_approval(&mut tx, approval_id).await? {
                if check_plan_eligible(status, is_health, &approval, today).is_ok() {
                    eligible.push(approval);
                }
            }
        }
        tx.commit().await?;
        Ok(eligible)
    }

    pub async fn list(&self, user_id: i64, today: NaiveDate) -> DbResult<Vec<PrescriptionPlan>> {
        let mut tx = self.pool.begin().await?;
        sweep_expired(&mut tx, Some(user_id), today).await?;
        let plans = sqlx::query_as::<_, PrescriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM prescription_plans WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(plans)
    }

    pub async fn create(
        &self,
        user: &User,
        req: &PlanRequest,
        today: NaiveDate,
        reminder_interval_days: i64,
    ) -> DbResult<PrescriptionPlan> {
        let mut tx = self.pool.begin().await?;
        sweep_expired(&mut tx, Some(user.id), today).await?;

        let (approval, price) = eligible_approval(&mut tx, user.id, req.approval_id, today).await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM prescription_plans WHERE approval_id = ?1")
            .bind(approval.id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(CoreError::PlanNotAllowed("this approval already has a plan".to_string()).into());
        }

        let target = resolve_target(&mut tx, user, req).await?;
        ensure_branch_stock(&mut tx, &approval, target.branch_id, today).await?;

        let is_delivery = target.address_id.is_some();
        let total = plan_total(price, approval.quantity, is_delivery);
        let created_at = Utc::now();

        let shipping_id: i64 = sqlx::query_scalar(
            "INSERT INTO shippings (branch_id, is_delivery, is_urgent, address_id, created_at)
             VALUES (?1, ?2, 0, ?3, ?4) RETURNING id",
        )
        .bind(target.branch_id)
        .bind(is_delivery)
        .bind(target.address_id)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        let plan = sqlx::query_as::<_, PrescriptionPlan>(&format!(
            "INSERT INTO prescription_plans (user_id, approval_id, shipping_id, status, total_fils,
                                             next_reminder_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(user.id)
        .bind(approval.id)
        .bind(shipping_id)
        .bind(PlanStatus::Ongoing)
        .bind(total.fils())
        .bind(next_reminder(today, reminder_interval_days))
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Plan,
            Some(user.id),
            format!(
                "Plan {} created for {} x {} (total {})",
                plan.id, approval.quantity, approval.product_name, total
            ),
        )
        .await?;
        tx.commit().await?;

        info!(plan_id = plan.id, user_id = user.id, approval_id = approval.id, "Prescription plan created");
        Ok(plan)
    }

    /// Re-resolves the plan's shipping and total from its approval.
    pub async fn update(&self, user: &User, plan_id: i64, req: &PlanRequest, today: NaiveDate) -> DbResult<PrescriptionPlan> {
        let mut tx = self.pool.begin().await?;
        sweep_expired(&mut tx, Some(user.id), today).await?;

        let plan = Self::owned_plan(&mut tx, user.id, plan_id).await?;
        if plan.status != PlanStatus::Ongoing {
            return Err(CoreError::PlanNotAllowed("plan has expired".to_string()).into());
        }
        let (approval, price) = eligible_approval(&mut tx, user.id, plan.approval_id, today).await?;

        let old: ShippingTarget = sqlx::query_as("SELECT branch_id, address_id FROM shippings WHERE id = ?1")
            .bind(plan.shipping_id)
            .fetch_one(&mut *tx)
            .await?;

        let target = resolve_target(&mut tx, user, req).await?;
        ensure_branch_stock(&mut tx, &approval, target.branch_id, today).await?;
        let is_delivery = target.address_id.is_some();
        let total = plan_total(price, approval.quantity, is_delivery);

        sqlx::query("UPDATE shippings SET branch_id = ?1, is_delivery = ?2, address_id = ?3 WHERE id = ?4")
            .bind(target.branch_id)
            .bind(is_delivery)
            .bind(target.address_id)
            .bind(plan.shipping_id)
            .execute(&mut *tx)
            .await?;

        if let Some(old_address) = old.address_id.filter(|id| Some(*id) != target.address_id) {
            drop_transient_address(&mut tx, old_address).await?;
        }

        let updated = sqlx::query_as::<_, PrescriptionPlan>(&format!(
            "UPDATE prescription_plans SET total_fils = ?1 WHERE id = ?2 RETURNING {PLAN_COLUMNS}"
        ))
        .bind(total.fils())
        .bind(plan_id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Plan,
            Some(user.id),
            format!(
                "Plan {} updated: branch {} -> {}, total {}",
                plan_id, old.branch_id, target.branch_id, total
            ),
        )
        .await?;
        tx.commit().await?;

        debug!(plan_id, branch_id = target.branch_id, "Prescription plan updated");
        Ok(updated)
    }

    /// Deletes the plan, its shipping, and a non-profile address.
    pub async fn delete(&self, user: &User, plan_id: i64) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let plan = Self::owned_plan(&mut tx, user.id, plan_id).await?;

        let address_id: Option<i64> = sqlx::query_scalar("SELECT address_id FROM shippings WHERE id = ?1")
            .bind(plan.shipping_id)
            .fetch_optional(&mut *tx)
            .await?
            .flatten();

        sqlx::query("DELETE FROM prescription_plans WHERE id = ?1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM shippings WHERE id = ?1")
            .bind(plan.shipping_id)
            .execute(&mut *tx)
            .await?;
        if let Some(id) = address_id {
            drop_transient_address(&mut tx, id).await?;
        }

        log::append(&mut tx, LogType::Plan, Some(user.id), format!("Plan {} deleted", plan_id)).await?;
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Reminders
    // =========================================================================

    /// Ongoing plans whose reminder date has arrived.
    pub async fn due_reminders(&self, today: NaiveDate) -> DbResult<Vec<PlanReminder>> {
        let rows = sqlx::query_as::<_, PlanReminder>(
            "SELECT pp.id AS plan_id, pp.user_id, u.email, a.product_name, pp.total_fils, pp.next_reminder_date
             FROM prescription_plans pp
             JOIN users u ON u.id = pp.user_id
             JOIN approvals a ON a.id = pp.approval_id
             WHERE pp.status = 'Ongoing' AND pp.next_reminder_date <= ?1
             ORDER BY pp.next_reminder_date, pp.id",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Moves the next reminder `interval_days` past `today`.
    pub async fn advance_reminder(&self, plan_id: i64, today: NaiveDate, interval_days: i64) -> DbResult<NaiveDate> {
        let next = next_reminder(today, interval_days);
        let result = sqlx::query("UPDATE prescription_plans SET next_reminder_date = ?1 WHERE id = ?2")
            .bind(next)
            .bind(plan_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PrescriptionPlan", plan_id.to_string()));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::prescription::{ApprovalInput, PrescriptionUploadRequest};
    use crate::test_support::{add_batch, count, fixture, Fixture};
    use chrono::Duration;

    /// Customer with a health profile and an approved health prescription
    /// for 2 x Amoxicillin. Returns (fixture, customer, approval id).
    async fn approved_health(expiry_days: i64) -> (Fixture, User, i64) {
        let fx = fixture().await;
        sqlx::query("UPDATE users SET has_health_profile = 1 WHERE id = ?1")
            .bind(fx.customer.id)
            .execute(fx.db.pool())
            .await
            .unwrap();
        let customer = fx.db.users().get_by_id(fx.customer.id).await.unwrap().unwrap();

        let rx = fx
            .db
            .prescriptions()
            .upload(
                &customer,
                &PrescriptionUploadRequest {
                    name: "Chronic care".into(),
                    document: vec![1],
                    cpr_document: vec![2],
                    is_health: true,
                    branch_id: None,
                    use_profile_address: false,
                    address: None,
                },
            )
            .await
            .unwrap();
        let outcome = fx
            .db
            .prescriptions()
            .approve(
                &fx.pharmacist,
                rx.id,
                &ApprovalInput {
                    product_id: fx.prescribed,
                    quantity: 2,
                    dosage: "Twice daily".into(),
                    expiry_date: fx.today + Duration::days(expiry_days),
                },
                fx.today,
            )
            .await
            .unwrap();
        let approval_id = outcome.approval.id;
        (fx, customer, approval_id)
    }

    fn pickup(approval_id: i64, branch: i64) -> PlanRequest {
        PlanRequest {
            approval_id,
            branch_id: Some(branch),
            use_profile_address: false,
            address: None,
        }
    }

    #[tokio::test]
    async fn test_create_plan_snapshots_total() {
        let (fx, customer, approval_id) = approved_health(60).await;
        add_batch(&fx.db, fx.prescribed, fx.branch, Some(4), None).await;

        let eligible = fx.db.plans().eligible_approvals(customer.id, fx.today).await.unwrap();
        assert_eq!(eligible.len(), 1);

        let plan = fx
            .db
            .plans()
            .create(&customer, &pickup(approval_id, fx.branch), fx.today, 30)
            .await
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Ongoing);
        assert_eq!(plan.total_fils, 2 * 2500);
        assert_eq!(plan.next_reminder_date, fx.today + Duration::days(30));

        // one plan per approval
        assert!(fx.db.plans().eligible_approvals(customer.id, fx.today).await.unwrap().is_empty());
        let err = fx
            .db
            .plans()
            .create(&customer, &pickup(approval_id, fx.branch), fx.today, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::PlanNotAllowed(_))));
    }

    #[tokio::test]
    async fn test_plan_needs_branch_stock() {
        let (fx, customer, approval_id) = approved_health(60).await;
        add_batch(&fx.db, fx.prescribed, fx.other_branch, Some(10), None).await;

        let err = fx
            .db
            .plans()
            .create(&customer, &pickup(approval_id, fx.branch), fx.today, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::InsufficientStock { .. })));
        assert_eq!(count(&fx.db, "prescription_plans").await, 0);
        assert_eq!(count(&fx.db, "shippings").await, 0);
    }

    #[tokio::test]
    async fn test_update_to_delivery_then_delete_cascades() {
        let (fx, customer, approval_id) = approved_health(60).await;
        add_batch(&fx.db, fx.prescribed, fx.branch, Some(5), None).await;
        add_batch(&fx.db, fx.prescribed, fx.other_branch, Some(5), None).await;

        let plan = fx
            .db
            .plans()
            .create(&customer, &pickup(approval_id, fx.branch), fx.today, 30)
            .await
            .unwrap();

        let typed = PlanRequest {
            approval_id,
            branch_id: None,
            use_profile_address: false,
            address: Some(AddressInput {
                city_id: Some(2),
                block: "905".into(),
                road: "511".into(),
                building: "7".into(),
            }),
        };
        let updated = fx.db.plans().update(&customer, plan.id, &typed, fx.today).await.unwrap();
        assert_eq!(updated.total_fils, 2 * 2500 + 1000);
        let branch: i64 = sqlx::query_scalar("SELECT branch_id FROM shippings WHERE id = ?1")
            .bind(plan.shipping_id)
            .fetch_one(fx.db.pool())
            .await
            .unwrap();
        assert_eq!(branch, fx.other_branch);
        assert_eq!(count(&fx.db, "addresses").await, 2);

        fx.db.plans().delete(&customer, plan.id).await.unwrap();
        assert_eq!(count(&fx.db, "prescription_plans").await, 0);
        assert_eq!(count(&fx.db, "shippings").await, 0);
        // the profile address survives
        assert_eq!(count(&fx.db, "addresses").await, 1);
    }

    #[tokio::test]
    async fn test_expired_prescription_leaves_eligible_list_and_expires_plan() {
        let (fx, customer, approval_id) = approved_health(0).await;
        add_batch(&fx.db, fx.prescribed, fx.branch, Some(5), None).await;
        fx.db
            .plans()
            .create(&customer, &pickup(approval_id, fx.branch), fx.today, 30)
            .await
            .unwrap();

        let tomorrow = fx.today + Duration::days(1);
        let plans = fx.db.plans().list(customer.id, tomorrow).await.unwrap();
        assert_eq!(plans[0].status, PlanStatus::Expired);
        assert!(fx.db.plans().eligible_approvals(customer.id, tomorrow).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_reminders_advance() {
        let (fx, customer, approval_id) = approved_health(90).await;
        add_batch(&fx.db, fx.prescribed, fx.branch, Some(5), None).await;
        let plan = fx
            .db
            .plans()
            .create(&customer, &pickup(approval_id, fx.branch), fx.today, 7)
            .await
            .unwrap();

        assert!(fx.db.plans().due_reminders(fx.today).await.unwrap().is_empty());

        let later = fx.today + Duration::days(7);
        let due = fx.db.plans().due_reminders(later).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].product_name, "Amoxicillin");
        assert_eq!(due[0].email, "customer@test.bh");

        let next = fx.db.plans().advance_reminder(plan.id, later, 7).await.unwrap();
        assert_eq!(next, later + Duration::days(7));
        assert!(fx.db.plans().due_reminders(later).await.unwrap().is_empty());
    }
}
