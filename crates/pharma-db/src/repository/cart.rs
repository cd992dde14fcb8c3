//! # Cart Repository
//!
//! One row per (user, product). Quantities are checked against live stock
//! on every add and update, never cached.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::inventory::batches_for;
use pharma_core::checkout::CheckoutLine;
use pharma_core::fefo;
use pharma_core::validation::validate_quantity;
use pharma_core::{CartItem, CoreError};

/// A cart line as shown in the cart page.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CartLine {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub unit_price_fils: i64,
    pub quantity: i64,
    pub requires_prescription: bool,
    /// Usable stock across the branches considered.
    #[sqlx(default)]
    pub available: i64,
}

/// Cart contents joined with current product data, ready for checkout.
pub(crate) async fn checkout_lines(conn: &mut SqliteConnection, user_id: i64) -> DbResult<Vec<CheckoutLine>> {
    let lines = sqlx::query_as::<_, CheckoutLine>(
        "SELECT c.product_id, p.name AS product_name, p.price_fils AS unit_price_fils, c.quantity,
                p.requires_prescription, p.is_controlled
         FROM cart_items c JOIN products p ON p.id = c.product_id
         WHERE c.user_id = ?1
         ORDER BY c.id",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(lines)
}

pub(crate) async fn clear_cart(conn: &mut SqliteConnection, user_id: i64) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?1")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Usable stock in one branch, or summed over every branch.
async fn stock(conn: &mut SqliteConnection, product_id: i64, branch_id: Option<i64>, today: NaiveDate) -> DbResult<i64> {
    let batches = batches_for(conn, product_id, branch_id).await?;
    Ok(fefo::available_quantity(&batches, today))
}

async fn product_name(conn: &mut SqliteConnection, product_id: i64) -> DbResult<String> {
    sqlx::query_scalar("SELECT name FROM products WHERE id = ?1")
        .bind(product_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", product_id.to_string()))
}

async fn ensure_in_stock(
    conn: &mut SqliteConnection,
    product_id: i64,
    quantity: i64,
    branch_id: Option<i64>,
    today: NaiveDate,
) -> DbResult<()> {
    let name = product_name(&mut *conn, product_id).await?;
    let available = stock(&mut *conn, product_id, branch_id, today).await?;
    if quantity > available {
        return Err(CoreError::InsufficientStock {
            product: name,
            available,
            requested: quantity,
        }
        .into());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Cart lines with availability in `branch_id`, or across all branches.
    pub async fn list(&self, user_id: i64, branch_id: Option<i64>, today: NaiveDate) -> DbResult<Vec<CartLine>> {
        let mut conn = self.pool.acquire().await?;
        let mut lines = sqlx::query_as::<_, CartLine>(
            "SELECT c.id, c.product_id, p.name AS product_name, p.price_fils AS unit_price_fils,
                    c.quantity, p.requires_prescription
             FROM cart_items c JOIN products p ON p.id = c.product_id
             WHERE c.user_id = ?1
             ORDER BY c.id",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        for line in &mut lines {
            line.available = stock(&mut conn, line.product_id, branch_id, today).await?;
        }
        Ok(lines)
    }

    pub async fn add(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i64,
        branch_id: Option<i64>,
        today: NaiveDate,
    ) -> DbResult<CartItem> {
        validate_quantity(quantity).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM cart_items WHERE user_id = ?1 AND product_id = ?2")
                .bind(user_id)
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            let name = product_name(&mut tx, product_id).await?;
            return Err(CoreError::AlreadyListed { what: name, list: "cart" }.into());
        }

        ensure_in_stock(&mut tx, product_id, quantity, branch_id, today).await?;

        let item = sqlx::query_as::<_, CartItem>(
            "INSERT INTO cart_items (user_id, product_id, quantity) VALUES (?1, ?2, ?3)
             RETURNING id, user_id, product_id, quantity",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(user_id, product_id, quantity, "Added to cart");
        Ok(item)
    }

    pub async fn update_quantity(
        &self,
        user_id: i64,
        item_id: i64,
        quantity: i64,
        branch_id: Option<i64>,
        today: NaiveDate,
    ) -> DbResult<CartItem> {
        validate_quantity(quantity).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;
        let product_id: i64 =
            sqlx::query_scalar("SELECT product_id FROM cart_items WHERE id = ?1 AND user_id = ?2")
                .bind(item_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::not_found("CartItem", item_id.to_string()))?;

        ensure_in_stock(&mut tx, product_id, quantity, branch_id, today).await?;

        let item = sqlx::query_as::<_, CartItem>(
            "UPDATE cart_items SET quantity = ?1 WHERE id = ?2
             RETURNING id, user_id, product_id, quantity",
        )
        .bind(quantity)
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(item)
    }

    pub async fn remove(&self, user_id: i64, item_id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = ?1 AND user_id = ?2")
            .bind(item_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CartItem", item_id.to_string()));
        }
        Ok(())
    }

    pub async fn clear(&self, user_id: i64) -> DbResult<u64> {
        let mut conn = self.pool.acquire().await?;
        clear_cart(&mut conn, user_id).await
    }
}
