//! # Wishlist Repository

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::cart::CartRepository;
use pharma_core::{CartItem, CoreError, WishlistItem};

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WishlistLine {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub price_fils: i64,
}

#[derive(Debug, Clone)]
pub struct WishlistRepository {
    pool: SqlitePool,
}

impl WishlistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        WishlistRepository { pool }
    }

    pub async fn list(&self, user_id: i64) -> DbResult<Vec<WishlistLine>> {
        let rows = sqlx::query_as::<_, WishlistLine>(
            "SELECT w.id, w.product_id, p.name AS product_name, p.price_fils
             FROM wishlist_items w JOIN products p ON p.id = w.product_id
             WHERE w.user_id = ?1
             ORDER BY w.created_at DESC, w.id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn add(&self, user_id: i64, product_id: i64) -> DbResult<WishlistItem> {
        let item = sqlx::query_as::<_, WishlistItem>(
            "INSERT INTO wishlist_items (user_id, product_id, created_at) VALUES (?1, ?2, ?3)
             RETURNING id, user_id, product_id, created_at",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => CoreError::AlreadyListed {
                what: format!("Product {}", product_id),
                list: "wishlist",
            }
            .into(),
            other => other,
        })?;

        debug!(user_id, product_id, "Added to wishlist");
        Ok(item)
    }

    pub async fn remove(&self, user_id: i64, item_id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM wishlist_items WHERE id = ?1 AND user_id = ?2")
            .bind(item_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WishlistItem", item_id.to_string()));
        }
        Ok(())
    }

    /// Moves a wishlist entry into the cart with quantity 1.
    ///
    /// The entry stays on the wishlist when the cart add is refused.
    pub async fn move_to_cart(&self, user_id: i64, item_id: i64, today: NaiveDate) -> DbResult<CartItem> {
        let product_id: i64 =
            sqlx::query_scalar("SELECT product_id FROM wishlist_items WHERE id = ?1 AND user_id = ?2")
                .bind(item_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::not_found("WishlistItem", item_id.to_string()))?;

        let item = CartRepository::new(self.pool.clone())
            .add(user_id, product_id, 1, None, today)
            .await?;
        self.remove(user_id, item_id).await?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_batch, count, fixture, Fixture};

    #[tokio::test]
    async fn test_duplicate_wishlist_entry_rejected() {
        let Fixture { db, customer, product, .. } = fixture().await;
        db.wishlist().add(customer.id, product).await.unwrap();

        let err = db.wishlist().add(customer.id, product).await.unwrap_err();
        assert!(matches!(err, DbError::Rule(CoreError::AlreadyListed { list: "wishlist", .. })));
        assert_eq!(db.wishlist().list(customer.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_move_to_cart() {
        let Fixture { db, today, customer, product, branch, .. } = fixture().await;
        let item = db.wishlist().add(customer.id, product).await.unwrap();

        // no stock anywhere yet
        assert!(db.wishlist().move_to_cart(customer.id, item.id, today).await.is_err());
        assert_eq!(count(&db, "wishlist_items").await, 1);

        add_batch(&db, product, branch, Some(2), None).await;
        let cart_item = db.wishlist().move_to_cart(customer.id, item.id, today).await.unwrap();
        assert_eq!(cart_item.quantity, 1);
        assert_eq!(count(&db, "wishlist_items").await, 0);
    }
}
