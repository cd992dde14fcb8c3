//! # Product Repository
//!
//! Catalog search and product maintenance.
//!
//! ## Search
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET /api/Products?search=pana&categoryId=1&pageNumber=1&pageSize=20   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_search("pana")  ← letters, digits, spaces, hyphens only      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  WHERE name LIKE '%pana%' AND category_id = 1                          │
//! │  ORDER BY name LIMIT 20 OFFSET 0                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Paged { items: [Panadol, Panadol Extra], totalCount: 2, ... }         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::inventory::{BranchStock, InventoryRepository};
use crate::repository::user::UserRepository;
use crate::repository::{log, Paged};
use pharma_core::health::{self, HealthWarning};
use pharma_core::validation::Page;
use pharma_core::{CoreError, LogType, Product};

const PRODUCT_COLUMNS: &str = "id, name, description, price_fils, is_controlled, requires_prescription, \
     category_id, product_type_id, supplier_id, created_at";

/// Listing filter for `GET /api/Products`.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category_id: Option<i64>,
    pub product_type_id: Option<i64>,
    pub supplier_id: Option<i64>,
}

/// Body of `POST/PUT /api/Products`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductInput {
    pub name: String,
    pub description: Option<String>,
    pub price_fils: i64,
    #[serde(default)]
    pub is_controlled: bool,
    #[serde(default)]
    pub requires_prescription: bool,
    pub category_id: i64,
    pub product_type_id: i64,
    pub supplier_id: Option<i64>,
}

/// Product page: the product, its stock per branch, and, for a signed-in
/// customer, health-profile warnings.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductDetail {
    pub product: Product,
    pub ingredients: Vec<String>,
    pub availability: Vec<BranchStock>,
    pub warnings: Vec<HealthWarning>,
}

#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Paged, filtered catalog listing ordered by name.
    pub async fn search(&self, filter: &ProductFilter, page: Page) -> DbResult<Paged<Product>> {
        debug!(?filter, number = page.number, size = page.size, "Searching products");

        let build = |select: &str| {
            let mut qb = QueryBuilder::<Sqlite>::new(select);
            qb.push(" FROM products WHERE 1 = 1");
            if let Some(term) = &filter.search {
                qb.push(" AND name LIKE ").push_bind(format!("%{}%", term));
            }
            if let Some(id) = filter.category_id {
                qb.push(" AND category_id = ").push_bind(id);
            }
            if let Some(id) = filter.product_type_id {
                qb.push(" AND product_type_id = ").push_bind(id);
            }
            if let Some(id) = filter.supplier_id {
                qb.push(" AND supplier_id = ").push_bind(id);
            }
            qb
        };

        let total: i64 = build("SELECT COUNT(*)").build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = build(&format!("SELECT {PRODUCT_COLUMNS}"));
        select
            .push(" ORDER BY name, id LIMIT ")
            .push_bind(page.size)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let items: Vec<Product> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Paged::new(items, total, page))
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    /// Ingredient names of a product keyed by ingredient id.
    pub async fn ingredients(&self, product_id: i64) -> DbResult<HashMap<i64, String>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT i.id, i.name FROM product_ingredients pi
             JOIN ingredients i ON i.id = pi.ingredient_id
             WHERE pi.product_id = ?1",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Allergy/illness warnings for `user_id` on this product.
    pub async fn health_warnings(&self, product_id: i64, user_id: i64) -> DbResult<Vec<HealthWarning>> {
        let ingredients = self.ingredients(product_id).await?;
        if ingredients.is_empty() {
            return Ok(Vec::new());
        }
        let conditions = UserRepository::new(self.pool.clone())
            .declared_conditions(user_id)
            .await?;
        Ok(health::product_warnings(&ingredients, &conditions))
    }

    pub async fn detail(&self, id: i64, viewer: Option<i64>, today: NaiveDate) -> DbResult<ProductDetail> {
        let product = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id.to_string()))?;

        let mut ingredients: Vec<String> = self.ingredients(id).await?.into_values().collect();
        ingredients.sort();

        let availability = InventoryRepository::new(self.pool.clone())
            .availability_by_branch(id, today)
            .await?;

        let warnings = match viewer {
            Some(user_id) => self.health_warnings(id, user_id).await?,
            None => Vec::new(),
        };

        Ok(ProductDetail {
            product,
            ingredients,
            availability,
            warnings,
        })
    }

    pub async fn create(&self, actor_id: i64, input: &ProductInput) -> DbResult<Product> {
        let mut tx = self.pool.begin().await?;
        let product = sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (name, description, price_fils, is_controlled, requires_prescription,
                                   category_id, product_type_id, supplier_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(input.name.trim())
        .bind(input.description.as_deref())
        .bind(input.price_fils)
        .bind(input.is_controlled)
        .bind(input.requires_prescription)
        .bind(input.category_id)
        .bind(input.product_type_id)
        .bind(input.supplier_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Create,
            Some(actor_id),
            format!("Created product {} '{}'", product.id, product.name),
        )
        .await?;
        tx.commit().await?;

        info!(product_id = product.id, name = %product.name, "Product created");
        Ok(product)
    }

    pub async fn update(&self, actor_id: i64, id: i64, input: &ProductInput) -> DbResult<Product> {
        let mut tx = self.pool.begin().await?;
        let product = sqlx::query_as::<_, Product>(&format!(
            "UPDATE products SET name = ?1, description = ?2, price_fils = ?3, is_controlled = ?4,
                                 requires_prescription = ?5, category_id = ?6, product_type_id = ?7,
                                 supplier_id = ?8
             WHERE id = ?9
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(input.name.trim())
        .bind(input.description.as_deref())
        .bind(input.price_fils)
        .bind(input.is_controlled)
        .bind(input.requires_prescription)
        .bind(input.category_id)
        .bind(input.product_type_id)
        .bind(input.supplier_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id.to_string()))?;

        log::append(&mut tx, LogType::Update, Some(actor_id), format!("Updated product {}", id)).await?;
        tx.commit().await?;
        Ok(product)
    }

    /// Deletes a product once no inventory batch references it.
    pub async fn delete(&self, actor_id: i64, id: i64) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let batches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory WHERE product_id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if batches > 0 {
            return Err(CoreError::ProductInUse(id).into());
        }

        let result = sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id.to_string()));
        }

        log::append(&mut tx, LogType::Delete, Some(actor_id), format!("Deleted product {}", id)).await?;
        tx.commit().await?;
        Ok(())
    }
}
