//! # Report Repository
//!
//! Read-only aggregates for the staff dashboards and the revenue report.
//!
//! ```text
//! Admin       ── every branch
//! Manager     ─┐
//! Pharmacist   ├─ own branch only
//! Driver      ─┘
//! ```
//! Cancelled orders never count towards revenue.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use ts_rs::TS;

use crate::error::DbResult;
use crate::repository::scoped_branch;
use pharma_core::{CoreError, User, ValidationError};

/// Products whose usable branch stock is below this count as low stock.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

/// Batches expiring within this many days are flagged.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Dashboard {
    /// `None` for the global Admin view.
    pub branch_id: Option<i64>,
    pub orders_today: i64,
    pub revenue_today_fils: i64,
    pub open_orders: i64,
    pub open_deliveries: i64,
    pub pending_prescriptions: i64,
    pub pending_supplier_orders: i64,
    pub low_stock_products: i64,
    pub expiring_batches: i64,
    pub expired_batches: i64,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DayRevenue {
    pub day: String,
    pub order_count: i64,
    pub total_fils: i64,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TopProduct {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub revenue_fils: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RevenueReport {
    #[ts(as = "String")]
    pub from: NaiveDate,
    #[ts(as = "String")]
    pub to: NaiveDate,
    pub branch_id: Option<i64>,
    pub order_count: i64,
    pub total_fils: i64,
    pub days: Vec<DayRevenue>,
    pub top_products: Vec<TopProduct>,
}

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    async fn scalar(&self, sql: &str, branch: Option<i64>, day: NaiveDate) -> DbResult<i64> {
        let value: i64 = sqlx::query_scalar(sql)
            .bind(branch)
            .bind(day)
            .fetch_one(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn dashboard(&self, actor: &User, today: NaiveDate) -> DbResult<Dashboard> {
        let branch = scoped_branch(actor, None)?;
        let warn_until = today + chrono::Duration::days(EXPIRY_WARNING_DAYS);

        let orders_today = self
            .scalar(
                "SELECT COUNT(*) FROM orders o JOIN shippings s ON s.id = o.shipping_id
                 WHERE (?1 IS NULL OR s.branch_id = ?1) AND substr(o.created_at, 1, 10) = ?2
                   AND o.status != 'Cancelled'",
                branch,
                today,
            )
            .await?;
        let revenue_today_fils = self
            .scalar(
                "SELECT COALESCE(SUM(o.total_fils), 0) FROM orders o JOIN shippings s ON s.id = o.shipping_id
                 WHERE (?1 IS NULL OR s.branch_id = ?1) AND substr(o.created_at, 1, 10) = ?2
                   AND o.status != 'Cancelled'",
                branch,
                today,
            )
            .await?;
        let open_orders = self
            .scalar(
                "SELECT COUNT(*) FROM orders o JOIN shippings s ON s.id = o.shipping_id
                 WHERE (?1 IS NULL OR s.branch_id = ?1) AND ?2 IS NOT NULL
                   AND o.status IN ('Pending', 'Confirmed', 'ReadyForPickup', 'OutForDelivery')",
                branch,
                today,
            )
            .await?;
        let open_deliveries = self
            .scalar(
                "SELECT COUNT(*) FROM orders o JOIN shippings s ON s.id = o.shipping_id
                 WHERE (?1 IS NULL OR s.branch_id = ?1) AND ?2 IS NOT NULL AND s.is_delivery = 1
                   AND o.status IN ('Pending', 'Confirmed', 'OutForDelivery')",
                branch,
                today,
            )
            .await?;
        let pending_prescriptions = self
            .scalar(
                "SELECT COUNT(*) FROM prescriptions
                 WHERE (?1 IS NULL OR branch_id IS NULL OR branch_id = ?1) AND ?2 IS NOT NULL
                   AND status = 'Pending'",
                branch,
                today,
            )
            .await?;
        let pending_supplier_orders = self
            .scalar(
                "SELECT COUNT(*) FROM supplier_orders
                 WHERE (?1 IS NULL OR branch_id = ?1) AND ?2 IS NOT NULL AND status = 'Pending'",
                branch,
                today,
            )
            .await?;
        let low_stock_products: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (
                 SELECT i.product_id, i.branch_id,
                        SUM(CASE WHEN i.quantity > 0 AND (i.expiry_date IS NULL OR i.expiry_date >= ?2)
                                 THEN i.quantity ELSE 0 END) AS usable
                 FROM inventory i
                 WHERE ?1 IS NULL OR i.branch_id = ?1
                 GROUP BY i.product_id, i.branch_id
                 HAVING usable < ?3)",
        )
        .bind(branch)
        .bind(today)
        .bind(LOW_STOCK_THRESHOLD)
        .fetch_one(&self.pool)
        .await?;
        let expiring_batches: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inventory
             WHERE (?1 IS NULL OR branch_id = ?1) AND quantity > 0
               AND expiry_date >= ?2 AND expiry_date <= ?3",
        )
        .bind(branch)
        .bind(today)
        .bind(warn_until)
        .fetch_one(&self.pool)
        .await?;
        let expired_batches = self
            .scalar(
                "SELECT COUNT(*) FROM inventory
                 WHERE (?1 IS NULL OR branch_id = ?1) AND expiry_date < ?2",
                branch,
                today,
            )
            .await?;

        debug!(?branch, actor_id = actor.id, "Dashboard computed");
        Ok(Dashboard {
            branch_id: branch,
            orders_today,
            revenue_today_fils,
            open_orders,
            open_deliveries,
            pending_prescriptions,
            pending_supplier_orders,
            low_stock_products,
            expiring_batches,
            expired_batches,
        })
    }

    /// Revenue between `from` and `to` inclusive, by day and by product.
    pub async fn revenue(
        &self,
        actor: &User,
        from: NaiveDate,
        to: NaiveDate,
        branch_id: Option<i64>,
    ) -> DbResult<RevenueReport> {
        if from > to {
            return Err(CoreError::from(ValidationError::InvalidFormat {
                field: "from".to_string(),
                reason: "must not be after 'to'".to_string(),
            })
            .into());
        }
        let branch = scoped_branch(actor, branch_id)?;

        let days = sqlx::query_as::<_, DayRevenue>(
            "SELECT substr(o.created_at, 1, 10) AS day, COUNT(*) AS order_count,
                    SUM(o.total_fils) AS total_fils
             FROM orders o JOIN shippings s ON s.id = o.shipping_id
             WHERE o.status != 'Cancelled' AND (?1 IS NULL OR s.branch_id = ?1)
               AND substr(o.created_at, 1, 10) BETWEEN ?2 AND ?3
             GROUP BY day ORDER BY day",
        )
        .bind(branch)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let top_products = sqlx::query_as::<_, TopProduct>(
            "SELECT po.product_id, p.name AS product_name, SUM(po.quantity) AS quantity,
                    SUM(po.quantity * po.unit_price_fils) AS revenue_fils
             FROM product_orders po
             JOIN orders o ON o.id = po.order_id
             JOIN shippings s ON s.id = o.shipping_id
             JOIN products p ON p.id = po.product_id
             WHERE o.status != 'Cancelled' AND (?1 IS NULL OR s.branch_id = ?1)
               AND substr(o.created_at, 1, 10) BETWEEN ?2 AND ?3
             GROUP BY po.product_id, p.name
             ORDER BY revenue_fils DESC, po.product_id
             LIMIT 10",
        )
        .bind(branch)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(RevenueReport {
            from,
            to,
            branch_id: branch,
            order_count: days.iter().map(|d| d.order_count).sum(),
            total_fils: days.iter().map(|d| d.total_fils).sum(),
            days,
            top_products,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{add_batch, add_to_cart, fixture, Fixture};
    use chrono::{Duration, Utc};
    use pharma_core::checkout::{CheckoutRequest, FulfillmentMode};
    use pharma_core::PaymentMethod;

    async fn pickup_order(fx: &Fixture, product: i64, qty: i64) {
        add_to_cart(&fx.db, fx.customer.id, product, qty).await;
        let request = CheckoutRequest {
            mode: FulfillmentMode::Pickup,
            branch_id: Some(fx.branch),
            use_profile_address: false,
            address: None,
            is_urgent: false,
            delivery_date: None,
            slot_id: None,
            payment_method: PaymentMethod::Cash,
            payment_session_id: None,
            approved_prescription_id: None,
            prescription_upload: None,
        };
        fx.db
            .checkout()
            .place_order(&fx.customer, &request, false, Utc::now().naive_utc())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_revenue_groups_by_day_and_product() {
        let fx = fixture().await;
        let today = Utc::now().date_naive();
        add_batch(&fx.db, fx.product, fx.branch, Some(20), None).await;
        pickup_order(&fx, fx.product, 2).await;
        pickup_order(&fx, fx.product, 1).await;

        let report = fx.db.reports().revenue(&fx.admin, today, today, None).await.unwrap();
        assert_eq!(report.order_count, 2);
        assert_eq!(report.total_fils, 3 * 1500);
        assert_eq!(report.days.len(), 1);
        assert_eq!(report.top_products[0].quantity, 3);

        let elsewhere = fx
            .db
            .reports()
            .revenue(&fx.admin, today, today, Some(fx.other_branch))
            .await
            .unwrap();
        assert_eq!(elsewhere.order_count, 0);

        assert!(fx.db.reports().revenue(&fx.admin, today, today - Duration::days(1), None).await.is_err());
    }

    #[tokio::test]
    async fn test_dashboard_scoped_to_branch() {
        let fx = fixture().await;
        let today = fx.today;
        add_batch(&fx.db, fx.product, fx.branch, Some(3), Some(today + Duration::days(5))).await;
        add_batch(&fx.db, fx.product, fx.other_branch, Some(50), Some(today - Duration::days(1))).await;
        pickup_order(&fx, fx.product, 1).await;

        let mine = fx.db.reports().dashboard(&fx.manager, today).await.unwrap();
        assert_eq!(mine.branch_id, Some(fx.branch));
        assert_eq!(mine.orders_today, 1);
        assert_eq!(mine.low_stock_products, 1);
        assert_eq!(mine.expiring_batches, 1);
        assert_eq!(mine.expired_batches, 0);

        let global = fx.db.reports().dashboard(&fx.admin, today).await.unwrap();
        assert_eq!(global.branch_id, None);
        assert_eq!(global.expired_batches, 1);

        assert!(fx.db.reports().dashboard(&fx.unassigned, today).await.is_err());
    }
}
