//! # Supplier Order Repository
//!
//! Restock requests from a branch to a supplier. Receiving one turns it
//! into an inventory batch.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::{ensure_branch_access, log, scoped_branch};
use pharma_core::validation::validate_expiry_not_past;
use pharma_core::{CoreError, LogType, Role, SupplierOrder, SupplierOrderStatus, User, ValidationError};

const SUPPLIER_ORDER_COLUMNS: &str =
    "id, supplier_id, product_id, branch_id, employee_id, quantity, status, created_at, received_at";

/// Body of `POST /api/SupplierOrders`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewSupplierOrder {
    pub supplier_id: i64,
    pub product_id: i64,
    /// Required for Admins; other employees order for their own branch.
    pub branch_id: Option<i64>,
    pub quantity: i64,
}

async fn fetch(conn: &mut SqliteConnection, id: i64) -> DbResult<SupplierOrder> {
    sqlx::query_as::<_, SupplierOrder>(&format!(
        "SELECT {SUPPLIER_ORDER_COLUMNS} FROM supplier_orders WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| DbError::not_found("SupplierOrder", id.to_string()))
}

fn ensure_pending(order: &SupplierOrder, next: SupplierOrderStatus) -> DbResult<()> {
    if order.status != SupplierOrderStatus::Pending {
        return Err(CoreError::InvalidTransition {
            entity: "SupplierOrder",
            from: format!("{:?}", order.status),
            to: format!("{:?}", next),
        }
        .into());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SupplierOrderRepository {
    pool: SqlitePool,
}

impl SupplierOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SupplierOrderRepository { pool }
    }

    pub async fn list(&self, actor: &User, branch_id: Option<i64>) -> DbResult<Vec<SupplierOrder>> {
        let branch = scoped_branch(actor, branch_id)?;
        let rows = sqlx::query_as::<_, SupplierOrder>(&format!(
            "SELECT {SUPPLIER_ORDER_COLUMNS} FROM supplier_orders
             WHERE ?1 IS NULL OR branch_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(branch)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn create(&self, actor: &User, new: &NewSupplierOrder) -> DbResult<SupplierOrder> {
        let branch_id = match actor.role {
            Role::Admin => new.branch_id.ok_or_else(|| {
                CoreError::from(ValidationError::Required {
                    field: "branchId".to_string(),
                })
            })?,
            _ => actor
                .branch_id
                .ok_or_else(|| DbError::forbidden("Employee branch not found"))?,
        };
        if new.quantity <= 0 {
            return Err(CoreError::from(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            })
            .into());
        }

        let mut tx = self.pool.begin().await?;
        let order = sqlx::query_as::<_, SupplierOrder>(&format!(
            "INSERT INTO supplier_orders (supplier_id, product_id, branch_id, employee_id, quantity, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'Pending', ?6)
             RETURNING {SUPPLIER_ORDER_COLUMNS}"
        ))
        .bind(new.supplier_id)
        .bind(new.product_id)
        .bind(branch_id)
        .bind(actor.id)
        .bind(new.quantity)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::SupplierOrder,
            Some(actor.id),
            format!(
                "Supplier order {}: {} units of product {} from supplier {} for branch {}",
                order.id, order.quantity, order.product_id, order.supplier_id, branch_id
            ),
        )
        .await?;
        tx.commit().await?;

        info!(supplier_order_id = order.id, branch_id, "Supplier order created");
        Ok(order)
    }

    /// Marks the order Received and stocks a new batch. Returns the batch id.
    pub async fn receive(
        &self,
        actor: &User,
        id: i64,
        expiry_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> DbResult<(SupplierOrder, i64)> {
        if let Some(expiry) = expiry_date {
            validate_expiry_not_past(expiry, today).map_err(CoreError::from)?;
        }

        let mut tx = self.pool.begin().await?;
        let order = fetch(&mut tx, id).await?;
        ensure_branch_access(actor, order.branch_id)?;
        ensure_pending(&order, SupplierOrderStatus::Received)?;

        let now = Utc::now();
        let batch_id: i64 = sqlx::query_scalar(
            "INSERT INTO inventory (product_id, branch_id, quantity, expiry_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
        )
        .bind(order.product_id)
        .bind(order.branch_id)
        .bind(order.quantity)
        .bind(expiry_date)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let order = sqlx::query_as::<_, SupplierOrder>(&format!(
            "UPDATE supplier_orders SET status = 'Received', received_at = ?1 WHERE id = ?2
             RETURNING {SUPPLIER_ORDER_COLUMNS}"
        ))
        .bind(now)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::SupplierOrder,
            Some(actor.id),
            format!("Supplier order {} received as batch {}", id, batch_id),
        )
        .await?;
        tx.commit().await?;

        info!(supplier_order_id = id, batch_id, "Supplier order received");
        Ok((order, batch_id))
    }

    pub async fn cancel(&self, actor: &User, id: i64) -> DbResult<SupplierOrder> {
        let mut tx = self.pool.begin().await?;
        let order = fetch(&mut tx, id).await?;
        ensure_branch_access(actor, order.branch_id)?;
        ensure_pending(&order, SupplierOrderStatus::Cancelled)?;

        let order = sqlx::query_as::<_, SupplierOrder>(&format!(
            "UPDATE supplier_orders SET status = 'Cancelled' WHERE id = ?1 RETURNING {SUPPLIER_ORDER_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(&mut tx, LogType::SupplierOrder, Some(actor.id), format!("Supplier order {} cancelled", id)).await?;
        tx.commit().await?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{count, fixture, Fixture};
    use chrono::Duration;

    fn request(branch_id: Option<i64>) -> NewSupplierOrder {
        NewSupplierOrder {
            supplier_id: 1,
            product_id: 1,
            branch_id,
            quantity: 40,
        }
    }

    #[tokio::test]
    async fn test_employee_without_branch_rejected() {
        let Fixture { db, unassigned, .. } = fixture().await;

        let err = db.supplier_orders().create(&unassigned, &request(Some(1))).await.unwrap_err();
        assert!(matches!(&err, DbError::Forbidden(msg) if msg == "Employee branch not found"));
        assert_eq!(count(&db, "supplier_orders").await, 0);
    }

    #[tokio::test]
    async fn test_admin_must_name_branch() {
        let Fixture { db, admin, other_branch, .. } = fixture().await;
        assert!(db.supplier_orders().create(&admin, &request(None)).await.is_err());

        let order = db.supplier_orders().create(&admin, &request(Some(other_branch))).await.unwrap();
        assert_eq!(order.branch_id, other_branch);
    }

    #[tokio::test]
    async fn test_manager_orders_for_own_branch_and_receives() {
        let Fixture { db, today, manager, branch, product, .. } = fixture().await;

        let order = db.supplier_orders().create(&manager, &request(Some(99))).await.unwrap();
        assert_eq!(order.branch_id, branch);
        assert_eq!(order.status, SupplierOrderStatus::Pending);

        let expiry = today + Duration::days(365);
        let (received, batch_id) = db
            .supplier_orders()
            .receive(&manager, order.id, Some(expiry), today)
            .await
            .unwrap();
        assert_eq!(received.status, SupplierOrderStatus::Received);
        assert!(received.received_at.is_some());

        let batch = db.inventory().get_by_id(batch_id).await.unwrap().unwrap();
        assert_eq!(batch.quantity, Some(40));
        assert_eq!(batch.expiry_date, Some(expiry));
        assert_eq!(db.inventory().available(product, branch, today).await.unwrap(), 40);

        // cannot receive twice
        assert!(db.supplier_orders().receive(&manager, order.id, None, today).await.is_err());
        assert_eq!(db.supplier_orders().list(&manager, None).await.unwrap().len(), 1);
    }
}
