//! # Catalog Reference Data
//!
//! Categories, product types, suppliers, cities and branches: the small
//! lookup tables the storefront filters on.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::log;
use pharma_core::{Branch, Category, City, LogType, ProductType, Supplier};

#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Categories
    // =========================================================================

    pub async fn categories(&self) -> DbResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn create_category(&self, actor_id: i64, name: &str, image: Option<&[u8]>) -> DbResult<Category> {
        let mut tx = self.pool.begin().await?;
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, image) VALUES (?1, ?2) RETURNING id, name",
        )
        .bind(name.trim())
        .bind(image)
        .fetch_one(&mut *tx)
        .await?;
        log::append(&mut tx, LogType::Create, Some(actor_id), format!("Created category '{}'", category.name)).await?;
        tx.commit().await?;

        debug!(category_id = category.id, "Category created");
        Ok(category)
    }

    /// Raw image bytes for a category, if one was uploaded.
    pub async fn category_image(&self, id: i64) -> DbResult<Option<Vec<u8>>> {
        let image: Option<Option<Vec<u8>>> = sqlx::query_scalar("SELECT image FROM categories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(image.flatten())
    }

    // =========================================================================
    // Product types
    // =========================================================================

    pub async fn product_types(&self) -> DbResult<Vec<ProductType>> {
        let rows = sqlx::query_as::<_, ProductType>("SELECT id, name FROM product_types ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn create_product_type(&self, actor_id: i64, name: &str) -> DbResult<ProductType> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ProductType>(
            "INSERT INTO product_types (name) VALUES (?1) RETURNING id, name",
        )
        .bind(name.trim())
        .fetch_one(&mut *tx)
        .await?;
        log::append(&mut tx, LogType::Create, Some(actor_id), format!("Created product type '{}'", row.name)).await?;
        tx.commit().await?;
        Ok(row)
    }

    // =========================================================================
    // Suppliers
    // =========================================================================

    pub async fn suppliers(&self) -> DbResult<Vec<Supplier>> {
        let rows = sqlx::query_as::<_, Supplier>("SELECT id, name, email FROM suppliers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn create_supplier(&self, actor_id: i64, name: &str, email: Option<&str>) -> DbResult<Supplier> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, Supplier>(
            "INSERT INTO suppliers (name, email) VALUES (?1, ?2) RETURNING id, name, email",
        )
        .bind(name.trim())
        .bind(email.map(str::trim))
        .fetch_one(&mut *tx)
        .await?;
        log::append(&mut tx, LogType::Create, Some(actor_id), format!("Created supplier '{}'", row.name)).await?;
        tx.commit().await?;
        Ok(row)
    }

    // =========================================================================
    // Places
    // =========================================================================

    pub async fn cities(&self) -> DbResult<Vec<City>> {
        let rows = sqlx::query_as::<_, City>("SELECT id, name, branch_id FROM cities ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn branches(&self) -> DbResult<Vec<Branch>> {
        let rows = sqlx::query_as::<_, Branch>("SELECT id, name, city_id FROM branches ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn branch(&self, id: i64) -> DbResult<Option<Branch>> {
        let row = sqlx::query_as::<_, Branch>("SELECT id, name, city_id FROM branches WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig, DbError};

    #[tokio::test]
    async fn test_duplicate_category_is_unique_violation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("INSERT INTO users (id, email, first_name, last_name, role) VALUES (1, 'a@x.bh', 'A', 'B', 'Admin')")
            .execute(db.pool())
            .await
            .unwrap();

        db.catalog().create_category(1, "Vitamins", None).await.unwrap();
        let err = db.catalog().create_category(1, "Vitamins", None).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        let categories = db.catalog().categories().await.unwrap();
        assert_eq!(categories.len(), 1);
    }
}
