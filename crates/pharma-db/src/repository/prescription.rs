//! # Prescription Repository
//!
//! Upload, pharmacist review, and the expiry sweep.
//!
//! ## Approval
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  approve(pharmacist, id, { productId, quantity, dosage, expiryDate })  │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │   ├── Pending → Approved           (anything else: InvalidTransition)  │
//! │   ├── INSERT approvals                                                 │
//! │   ├── log Approval (+ ControlledDispensation for controlled products) │
//! │   └── standalone, non-health, with fulfilment, no order yet?          │
//! │         └── shipping + cash payment + order + line + FEFO decrement   │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  The caller sends the notification after the commit.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Expiry sweep
//! An Approved health prescription whose latest approval expired before
//! today is moved to Expired, together with its plans, whenever the owner's
//! prescriptions are read. The reminder job runs the same sweep for everyone.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::inventory::consume_fefo;
use crate::repository::user::{branch_for_city, fetch_address, insert_address};
use crate::repository::{ensure_branch_access, log, scoped_branch, Paged};
use pharma_core::checkout::{AddressInput, CheckoutStage, DELIVERY_FEE};
use pharma_core::prescription::{check_transition, should_expire};
use pharma_core::validation::{
    validate_expiry_not_past, validate_name, validate_quantity, validate_required_text, Page,
};
use pharma_core::{
    Approval, CoreError, LogType, Money, OrderStatus, PaymentMethod, Prescription, PrescriptionStatus,
    RejectionReason, User, ValidationError,
};

const PRESCRIPTION_COLUMNS: &str =
    "id, user_id, name, status, is_health, is_delivery, branch_id, address_id, rejection_reason, created_at";

const APPROVAL_COLUMNS: &str =
    "id, prescription_id, pharmacist_id, product_id, product_name, quantity, dosage, expiry_date, created_at";

// =============================================================================
// DTOs
// =============================================================================

/// Body of `POST /api/Prescription`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PrescriptionUploadRequest {
    pub name: String,
    #[serde(with = "pharma_core::blob")]
    #[ts(as = "String")]
    pub document: Vec<u8>,
    #[serde(with = "pharma_core::blob")]
    #[ts(as = "String")]
    pub cpr_document: Vec<u8>,
    #[serde(default)]
    pub is_health: bool,
    /// Pickup branch for a standalone prescription.
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub use_profile_address: bool,
    pub address: Option<AddressInput>,
}

/// Body of `POST /api/Prescription/{id}/approve`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApprovalInput {
    pub product_id: i64,
    pub quantity: i64,
    pub dosage: String,
    #[ts(as = "String")]
    pub expiry_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApprovalOutcome {
    pub prescription: Prescription,
    pub approval: Approval,
    /// Order spawned for a standalone prescription.
    pub order_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PrescriptionDocuments {
    #[serde(with = "pharma_core::blob")]
    #[ts(as = "String")]
    pub document: Vec<u8>,
    #[serde(with = "pharma_core::blob")]
    #[ts(as = "String")]
    pub cpr_document: Vec<u8>,
}

// =============================================================================
// Connection-level helpers
// =============================================================================

pub(crate) async fn fetch_prescription(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Prescription>> {
    let row = sqlx::query_as::<_, Prescription>(&format!(
        "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Approvals of a prescription, oldest first.
pub(crate) async fn approvals_for(conn: &mut SqliteConnection, prescription_id: i64) -> DbResult<Vec<Approval>> {
    let rows = sqlx::query_as::<_, Approval>(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE prescription_id = ?1 ORDER BY created_at, id"
    ))
    .bind(prescription_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub(crate) async fn fetch_approval(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Approval>> {
    let row = sqlx::query_as::<_, Approval>(&format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

#[derive(FromRow)]
struct SweepCandidate {
    id: i64,
    status: PrescriptionStatus,
    is_health: bool,
    latest_expiry: Option<NaiveDate>,
}

/// Moves lapsed health prescriptions (and their plans) to Expired.
///
/// Limited to one user when `user_id` is set. Returns the ids expired.
pub(crate) async fn sweep_expired(
    conn: &mut SqliteConnection,
    user_id: Option<i64>,
    today: NaiveDate,
) -> DbResult<Vec<i64>> {
    let candidates = sqlx::query_as::<_, SweepCandidate>(
        "SELECT p.id, p.status, p.is_health,
                (SELECT a.expiry_date FROM approvals a WHERE a.prescription_id = p.id
                 ORDER BY a.created_at DESC, a.id DESC LIMIT 1) AS latest_expiry
         FROM prescriptions p
         WHERE p.status = 'Approved' AND p.is_health = 1 AND (?1 IS NULL OR p.user_id = ?1)",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut expired = Vec::new();
    for c in candidates {
        if !should_expire(c.status, c.is_health, c.latest_expiry, today) {
            continue;
        }
        sqlx::query("UPDATE prescriptions SET status = 'Expired' WHERE id = ?1 AND status = 'Approved'")
            .bind(c.id)
            .execute(&mut *conn)
            .await?;
        sqlx::query(
            "UPDATE prescription_plans SET status = 'Expired'
             WHERE status = 'Ongoing'
               AND approval_id IN (SELECT id FROM approvals WHERE prescription_id = ?1)",
        )
        .bind(c.id)
        .execute(&mut *conn)
        .await?;
        expired.push(c.id);
    }

    if !expired.is_empty() {
        debug!(?user_id, count = expired.len(), "Prescriptions expired");
    }
    Ok(expired)
}

/// Resolved (branch, address) of a delivery to a saved or typed address.
pub(crate) async fn delivery_branch(
    conn: &mut SqliteConnection,
    user: &User,
    use_profile_address: bool,
    address: Option<&AddressInput>,
) -> DbResult<Option<(i64, i64)>> {
    let (city_id, address_id) = if use_profile_address {
        let saved = match user.profile_address_id {
            Some(id) => fetch_address(&mut *conn, id).await?,
            None => None,
        };
        match saved {
            Some(a) => (a.city_id, Some(a.id)),
            None => return Ok(None),
        }
    } else {
        match address.filter(|a| a.is_complete()) {
            Some(input) => match input.city_id {
                Some(city) => (city, None),
                None => return Ok(None),
            },
            None => return Ok(None),
        }
    };

    let branch_id = branch_for_city(&mut *conn, city_id)
        .await?
        .ok_or_else(|| DbError::rejected(CheckoutStage::ShippingResolved, RejectionReason::NoBranchForCity))?;

    let address_id = match (address_id, address) {
        (Some(id), _) => id,
        (None, Some(input)) => insert_address(&mut *conn, user.id, input).await?,
        (None, None) => return Ok(None),
    };
    Ok(Some((branch_id, address_id)))
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct PrescriptionRepository {
    pool: SqlitePool,
}

impl PrescriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PrescriptionRepository { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Prescription>> {
        let mut conn = self.pool.acquire().await?;
        fetch_prescription(&mut conn, id).await
    }

    pub async fn approvals(&self, prescription_id: i64) -> DbResult<Vec<Approval>> {
        let mut conn = self.pool.acquire().await?;
        approvals_for(&mut conn, prescription_id).await
    }

    /// Stores a customer upload as Pending.
    pub async fn upload(&self, user: &User, req: &PrescriptionUploadRequest) -> DbResult<Prescription> {
        validate_name("name", &req.name).map_err(CoreError::from)?;
        if req.document.is_empty() || req.cpr_document.is_empty() {
            return Err(CoreError::rejected(
                CheckoutStage::ReceivedCart,
                RejectionReason::UploadMissingDocuments,
            )
            .into());
        }
        if req.is_health && !user.has_health_profile {
            return Err(CoreError::from(ValidationError::InvalidFormat {
                field: "isHealth".to_string(),
                reason: "declare a health profile before uploading health prescriptions".to_string(),
            })
            .into());
        }

        let mut tx = self.pool.begin().await?;

        let delivery = delivery_branch(&mut tx, user, req.use_profile_address, req.address.as_ref()).await?;
        let (is_delivery, branch_id, address_id) = match delivery {
            Some((branch, address)) => (true, Some(branch), Some(address)),
            None => (false, req.branch_id, None),
        };

        let prescription = sqlx::query_as::<_, Prescription>(&format!(
            "INSERT INTO prescriptions (user_id, name, status, is_health, document, cpr_document,
                                        is_delivery, branch_id, address_id, created_at)
             VALUES (?1, ?2, 'Pending', ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING {PRESCRIPTION_COLUMNS}"
        ))
        .bind(user.id)
        .bind(req.name.trim())
        .bind(req.is_health)
        .bind(req.document.as_slice())
        .bind(req.cpr_document.as_slice())
        .bind(is_delivery)
        .bind(branch_id)
        .bind(address_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Create,
            Some(user.id),
            format!("Prescription {} uploaded", prescription.id),
        )
        .await?;
        tx.commit().await?;

        info!(prescription_id = prescription.id, user_id = user.id, is_health = req.is_health, "Prescription uploaded");
        Ok(prescription)
    }

    /// The user's prescriptions, newest first, after the expiry sweep.
    pub async fn list_for_user(&self, user_id: i64, today: NaiveDate) -> DbResult<Vec<Prescription>> {
        let mut tx = self.pool.begin().await?;
        sweep_expired(&mut tx, Some(user_id), today).await?;
        let rows = sqlx::query_as::<_, Prescription>(&format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Pending prescriptions for review. Staff below Admin see their own
    /// branch plus prescriptions with no branch yet.
    pub async fn pending(&self, actor: &User, page: Page) -> DbResult<Paged<Prescription>> {
        let branch = scoped_branch(actor, None)?;

        let build = |select: &str| {
            let mut qb = QueryBuilder::<Sqlite>::new(select);
            qb.push(" FROM prescriptions WHERE status = 'Pending'");
            if let Some(b) = branch {
                qb.push(" AND (branch_id IS NULL OR branch_id = ").push_bind(b).push(")");
            }
            qb
        };

        let total: i64 = build("SELECT COUNT(*)").build_query_scalar().fetch_one(&self.pool).await?;
        let mut select = build(&format!("SELECT {PRESCRIPTION_COLUMNS}"));
        select
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(page.size)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let items: Vec<Prescription> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Paged::new(items, total, page))
    }

    /// Document blobs. Owners and staff only.
    pub async fn documents(&self, actor: &User, id: i64) -> DbResult<PrescriptionDocuments> {
        let owner: i64 = sqlx::query_scalar("SELECT user_id FROM prescriptions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Prescription", id.to_string()))?;
        if owner != actor.id && !actor.role.is_employee() {
            return Err(DbError::forbidden(format!("prescription {} belongs to another user", id)));
        }

        let docs = sqlx::query_as::<_, PrescriptionDocuments>(
            "SELECT document, cpr_document FROM prescriptions WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(docs)
    }

    pub async fn approve(
        &self,
        pharmacist: &User,
        id: i64,
        input: &ApprovalInput,
        today: NaiveDate,
    ) -> DbResult<ApprovalOutcome> {
        validate_quantity(input.quantity).map_err(CoreError::from)?;
        validate_required_text("dosage", &input.dosage, 200).map_err(CoreError::from)?;
        validate_expiry_not_past(input.expiry_date, today).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;

        let prescription = fetch_prescription(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Prescription", id.to_string()))?;
        ensure_reviewer_branch(pharmacist, &prescription)?;
        check_transition(prescription.status, PrescriptionStatus::Approved)?;

        let (product_name, is_controlled, price_fils): (String, bool, i64) =
            sqlx::query_as("SELECT name, is_controlled, price_fils FROM products WHERE id = ?1")
                .bind(input.product_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::not_found("Product", input.product_id.to_string()))?;

        let approval = sqlx::query_as::<_, Approval>(&format!(
            "INSERT INTO approvals (prescription_id, pharmacist_id, product_id, product_name,
                                    quantity, dosage, expiry_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING {APPROVAL_COLUMNS}"
        ))
        .bind(id)
        .bind(pharmacist.id)
        .bind(input.product_id)
        .bind(&product_name)
        .bind(input.quantity)
        .bind(input.dosage.trim())
        .bind(input.expiry_date)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let prescription = sqlx::query_as::<_, Prescription>(&format!(
            "UPDATE prescriptions SET status = 'Approved', rejection_reason = NULL WHERE id = ?1
             RETURNING {PRESCRIPTION_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Approval,
            Some(pharmacist.id),
            format!(
                "Prescription {} approved: {} x {} ({}), valid until {}",
                id, input.quantity, product_name, approval.dosage, input.expiry_date
            ),
        )
        .await?;
        if is_controlled {
            log::append(
                &mut tx,
                LogType::ControlledDispensation,
                Some(pharmacist.id),
                format!(
                    "Controlled product {} approved for user {} on prescription {} ({} units)",
                    product_name, prescription.user_id, id, input.quantity
                ),
            )
            .await?;
        }

        let order_id = spawn_standalone_order(&mut tx, &prescription, &approval, price_fils, today).await?;
        tx.commit().await?;

        info!(prescription_id = id, pharmacist_id = pharmacist.id, ?order_id, "Prescription approved");
        Ok(ApprovalOutcome {
            prescription,
            approval,
            order_id,
        })
    }

    pub async fn reject(&self, pharmacist: &User, id: i64, reason: &str) -> DbResult<Prescription> {
        validate_required_text("reason", reason, 500).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;
        let current = fetch_prescription(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Prescription", id.to_string()))?;
        ensure_reviewer_branch(pharmacist, &current)?;
        check_transition(current.status, PrescriptionStatus::Rejected)?;

        let prescription = sqlx::query_as::<_, Prescription>(&format!(
            "UPDATE prescriptions SET status = 'Rejected', rejection_reason = ?1 WHERE id = ?2
             RETURNING {PRESCRIPTION_COLUMNS}"
        ))
        .bind(reason.trim())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Rejection,
            Some(pharmacist.id),
            format!("Prescription {} rejected: {}", id, reason.trim()),
        )
        .await?;
        tx.commit().await?;

        info!(prescription_id = id, pharmacist_id = pharmacist.id, "Prescription rejected");
        Ok(prescription)
    }

    /// Expiry sweep over every user.
    pub async fn sweep_all(&self, today: NaiveDate) -> DbResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let expired = sweep_expired(&mut tx, None, today).await?;
        tx.commit().await?;
        Ok(expired)
    }
}

/// Same visibility as `pending`: a prescription with no branch is open to
/// every reviewer, otherwise only to that branch (and Admins).
fn ensure_reviewer_branch(reviewer: &User, prescription: &Prescription) -> DbResult<()> {
    match prescription.branch_id {
        Some(branch_id) => ensure_branch_access(reviewer, branch_id),
        None => Ok(()),
    }
}

/// Creates the order for a standalone prescription the first time it is
/// approved. Returns `None` when no order is due.
async fn spawn_standalone_order(
    conn: &mut SqliteConnection,
    prescription: &Prescription,
    approval: &Approval,
    price_fils: i64,
    today: NaiveDate,
) -> DbResult<Option<i64>> {
    let branch_id = match prescription.branch_id {
        Some(b) if !prescription.is_health => b,
        _ => return Ok(None),
    };

    let linked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_orders WHERE prescription_id = ?1")
        .bind(prescription.id)
        .fetch_one(&mut *conn)
        .await?;
    if linked > 0 {
        return Ok(None);
    }

    let goods = Money::from_fils(price_fils).multiply_quantity(approval.quantity);
    let total = if prescription.is_delivery { goods + DELIVERY_FEE } else { goods };
    let created_at = Utc::now();

    let shipping_id: i64 = sqlx::query_scalar(
        "INSERT INTO shippings (branch_id, is_delivery, is_urgent, address_id, created_at)
         VALUES (?1, ?2, 0, ?3, ?4) RETURNING id",
    )
    .bind(branch_id)
    .bind(prescription.is_delivery)
    .bind(prescription.address_id)
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;

    let payment_id: i64 = sqlx::query_scalar(
        "INSERT INTO payments (method, amount_fils, is_successful, created_at) VALUES (?1, ?2, 1, ?3) RETURNING id",
    )
    .bind(PaymentMethod::Cash)
    .bind(total.fils())
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;

    let order_id: i64 = sqlx::query_scalar(
        "INSERT INTO orders (user_id, shipping_id, payment_id, status, total_fils, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
    )
    .bind(prescription.user_id)
    .bind(shipping_id)
    .bind(payment_id)
    .bind(OrderStatus::Pending)
    .bind(total.fils())
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO product_orders (order_id, product_id, quantity, unit_price_fils, prescription_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(order_id)
    .bind(approval.product_id)
    .bind(approval.quantity)
    .bind(price_fils)
    .bind(prescription.id)
    .execute(&mut *conn)
    .await?;

    consume_fefo(
        &mut *conn,
        approval.product_id,
        &approval.product_name,
        branch_id,
        approval.quantity,
        today,
    )
    .await?;

    log::append(
        conn,
        LogType::Checkout,
        Some(prescription.user_id),
        format!("Order {} created from prescription {}", order_id, prescription.id),
    )
    .await?;

    Ok(Some(order_id))
}

// =============================================================================
// Unit Tests
// =============================================================================
