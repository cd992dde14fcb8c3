//! # Order Repository
//!
//! Order history for customers and the delivery queue for drivers.
//!
//! ## Delivery Workflow
//! ```text
//! Pending ──► Confirmed ──► OutForDelivery ──► Delivered
//!    └────────────┴──► Cancelled
//! ```
//! Drivers only see and move orders of their own branch.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::info;
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::{ensure_branch_access, log, scoped_branch};
use pharma_core::{CoreError, LogType, Order, OrderStatus, Role, Shipping, User};

const ORDER_COLUMNS: &str = "id, user_id, shipping_id, payment_id, status, total_fils, created_at";

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OrderLine {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_fils: i64,
    pub prescription_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OrderDetail {
    pub order: Order,
    pub shipping: Shipping,
    pub lines: Vec<OrderLine>,
}

/// One row of the driver's delivery queue.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DeliveryRequest {
    pub order_id: i64,
    pub user_id: i64,
    pub customer_name: String,
    pub status: OrderStatus,
    pub total_fils: i64,
    pub branch_id: i64,
    pub is_urgent: bool,
    #[ts(as = "Option<String>")]
    pub delivery_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub delivery_time: Option<NaiveTime>,
    pub slot_name: Option<String>,
    pub city_name: Option<String>,
    pub block: Option<String>,
    pub road: Option<String>,
    pub building: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn list_for_user(&self, user_id: i64) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Order with its shipping and lines. Customers see their own orders,
    /// staff the orders of their branch.
    pub async fn get(&self, actor: &User, order_id: i64) -> DbResult<OrderDetail> {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id.to_string()))?;

        let shipping = sqlx::query_as::<_, Shipping>(
            "SELECT id, branch_id, is_delivery, is_urgent, address_id, slot_id, delivery_date,
                    delivery_time, created_at
             FROM shippings WHERE id = ?1",
        )
        .bind(order.shipping_id)
        .fetch_one(&self.pool)
        .await?;

        if actor.role == Role::Customer {
            if order.user_id != actor.id {
                return Err(DbError::not_found("Order", order_id.to_string()));
            }
        } else {
            ensure_branch_access(actor, shipping.branch_id)?;
        }

        let lines = sqlx::query_as::<_, OrderLine>(
            "SELECT po.product_id, p.name AS product_name, po.quantity, po.unit_price_fils, po.prescription_id
             FROM product_orders po JOIN products p ON p.id = po.product_id
             WHERE po.order_id = ?1 ORDER BY po.id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(OrderDetail { order, shipping, lines })
    }

    /// Open delivery orders of the actor's branch (any branch for Admin).
    pub async fn delivery_requests(&self, actor: &User, branch_id: Option<i64>) -> DbResult<Vec<DeliveryRequest>> {
        let branch = scoped_branch(actor, branch_id)?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT o.id AS order_id, o.user_id, u.first_name || ' ' || u.last_name AS customer_name,
                    o.status, o.total_fils, s.branch_id, s.is_urgent, s.delivery_date, s.delivery_time,
                    sl.name AS slot_name, c.name AS city_name, a.block, a.road, a.building
             FROM orders o
             JOIN shippings s ON s.id = o.shipping_id
             JOIN users u ON u.id = o.user_id
             LEFT JOIN slots sl ON sl.id = s.slot_id
             LEFT JOIN addresses a ON a.id = s.address_id
             LEFT JOIN cities c ON c.id = a.city_id
             WHERE s.is_delivery = 1
               AND o.status IN ('Pending', 'Confirmed', 'OutForDelivery')",
        );
        if let Some(b) = branch {
            qb.push(" AND s.branch_id = ").push_bind(b);
        }
        qb.push(" ORDER BY s.is_urgent DESC, s.delivery_date IS NULL, s.delivery_date, s.delivery_time, o.id");

        let rows: Vec<DeliveryRequest> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Moves a delivery order along the workflow.
    pub async fn update_status(&self, actor: &User, order_id: i64, next: OrderStatus) -> DbResult<Order> {
        let mut tx = self.pool.begin().await?;

        let (status, branch_id): (OrderStatus, i64) = sqlx::query_as(
            "SELECT o.status, s.branch_id FROM orders o JOIN shippings s ON s.id = o.shipping_id WHERE o.id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found("Order", order_id.to_string()))?;

        ensure_branch_access(actor, branch_id)?;

        if !status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                entity: "Order",
                from: status.to_string(),
                to: next.to_string(),
            }
            .into());
        }

        let order = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = ?1 WHERE id = ?2 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(next)
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Delivery,
            Some(actor.id),
            format!("Order {} moved from {} to {}", order_id, status, next),
        )
        .await?;
        tx.commit().await?;

        info!(order_id, from = %status, to = %next, actor_id = actor.id, "Order status updated");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_batch, add_to_cart, fixture, Fixture};
    use chrono::{Duration, Utc};
    use pharma_core::checkout::{CheckoutRequest, FulfillmentMode};
    use pharma_core::PaymentMethod;

    async fn delivered_order(fx: &Fixture) -> i64 {
        add_batch(&fx.db, fx.product, fx.branch, Some(5), None).await;
        add_to_cart(&fx.db, fx.customer.id, fx.product, 1).await;
        let request = CheckoutRequest {
            mode: FulfillmentMode::Delivery,
            branch_id: None,
            use_profile_address: true,
            address: None,
            is_urgent: false,
            delivery_date: Some(fx.today + Duration::days(1)),
            slot_id: Some(1),
            payment_method: PaymentMethod::Cash,
            payment_session_id: None,
            approved_prescription_id: None,
            prescription_upload: None,
        };
        fx.db
            .checkout()
            .place_order(&fx.customer, &request, false, Utc::now().naive_utc())
            .await
            .unwrap()
            .order_id
    }

    #[tokio::test]
    async fn test_driver_moves_order_through_workflow() {
        let fx = fixture().await;
        let order_id = delivered_order(&fx).await;

        let queue = fx.db.orders().delivery_requests(&fx.driver, None).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].city_name.as_deref(), Some("Manama"));

        let err = fx
            .db
            .orders()
            .update_status(&fx.driver, order_id, OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::InvalidTransition { .. })));

        fx.db.orders().update_status(&fx.driver, order_id, OrderStatus::OutForDelivery).await.unwrap();
        let done = fx.db.orders().update_status(&fx.driver, order_id, OrderStatus::Delivered).await.unwrap();
        assert_eq!(done.status, OrderStatus::Delivered);

        assert!(fx.db.orders().delivery_requests(&fx.driver, None).await.unwrap().is_empty());
        assert_eq!(fx.db.logs().by_type(LogType::Delivery).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cross_branch_driver_forbidden() {
        let fx = fixture().await;
        let order_id = delivered_order(&fx).await;
        let outsider = User {
            branch_id: Some(fx.other_branch),
            ..fx.driver.clone()
        };

        let err = fx
            .db
            .orders()
            .update_status(&outsider, order_id, OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Forbidden(_)));
        assert!(fx.db.orders().delivery_requests(&outsider, Some(fx.branch)).await.is_err());
    }

    #[tokio::test]
    async fn test_customer_sees_only_own_orders() {
        let fx = fixture().await;
        let order_id = delivered_order(&fx).await;

        let detail = fx.db.orders().get(&fx.customer, order_id).await.unwrap();
        assert_eq!(detail.lines.len(), 1);
        assert!(detail.shipping.is_delivery);
        assert_eq!(fx.db.orders().list_for_user(fx.customer.id).await.unwrap().len(), 1);

        let other = User { id: fx.customer.id + 999, ..fx.customer.clone() };
        assert!(matches!(
            fx.db.orders().get(&other, order_id).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
