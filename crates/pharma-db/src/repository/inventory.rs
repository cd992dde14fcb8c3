//! # Inventory Repository
//!
//! Stock batches per (product, branch) and the FEFO decrement used by
//! checkout and prescription approval.
//!
//! ## Consumption
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  consume_fefo(product 7, branch 2, qty 6)      (inside caller's tx)     │
//! │                                                                         │
//! │  1. SELECT batches for (7, 2)                                          │
//! │  2. pharma_core::fefo::plan_consumption ──► [#11 take 4, #12 take 2]   │
//! │       └── shortfall? InsufficientStock, nothing written                │
//! │  3. for each draw:                                                     │
//! │       UPDATE inventory SET quantity = quantity - take                  │
//! │       WHERE id = ? AND quantity >= take                                │
//! │       └── 0 rows? another checkout got there first:                    │
//! │           TransactionFailed, caller's tx rolls back                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::repository::{ensure_branch_access, log, scoped_branch, Paged};
use pharma_core::fefo::{self, BatchDraw};
use pharma_core::validation::Page;
use pharma_core::{InventoryBatch, LogType, User};

const BATCH_COLUMNS: &str = "id, product_id, branch_id, quantity, expiry_date, created_at";

// =============================================================================
// DTOs
// =============================================================================

/// A batch row joined with its product and branch names.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InventoryRow {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub branch_id: i64,
    pub branch_name: String,
    pub quantity: Option<i64>,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
}

/// Listing filter for `GET /api/Inventory`.
#[derive(Debug, Clone, Default)]
pub struct InventoryFilter {
    pub search: Option<String>,
    pub branch_id: Option<i64>,
    /// Batches expiring on or before this date.
    pub expiry_date: Option<NaiveDate>,
}

/// Body of `POST /api/Inventory`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewBatch {
    pub product_id: i64,
    pub branch_id: i64,
    pub quantity: i64,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
}

/// Body of `PUT /api/Inventory/{id}`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BatchUpdate {
    pub quantity: i64,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
}

/// Usable stock of one product in one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BranchStock {
    pub branch_id: i64,
    pub available: i64,
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

/// Batches of a product, optionally limited to one branch.
pub(crate) async fn batches_for(
    conn: &mut SqliteConnection,
    product_id: i64,
    branch_id: Option<i64>,
) -> DbResult<Vec<InventoryBatch>> {
    let batches = sqlx::query_as::<_, InventoryBatch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM inventory
         WHERE product_id = ?1 AND (?2 IS NULL OR branch_id = ?2)
         ORDER BY id"
    ))
    .bind(product_id)
    .bind(branch_id)
    .fetch_all(conn)
    .await?;
    Ok(batches)
}

/// Usable stock of a product in a branch on `today`.
pub(crate) async fn available_in_branch(
    conn: &mut SqliteConnection,
    product_id: i64,
    branch_id: i64,
    today: NaiveDate,
) -> DbResult<i64> {
    let batches = batches_for(conn, product_id, Some(branch_id)).await?;
    Ok(fefo::available_quantity(&batches, today))
}

/// Decrements `quantity` units FEFO. Must run inside the caller's transaction.
pub(crate) async fn consume_fefo(
    conn: &mut SqliteConnection,
    product_id: i64,
    product_name: &str,
    branch_id: i64,
    quantity: i64,
    today: NaiveDate,
) -> DbResult<Vec<BatchDraw>> {
    let batches = batches_for(&mut *conn, product_id, Some(branch_id)).await?;
    let draws = fefo::plan_consumption(product_name, &batches, quantity, today)?;
    apply_draws(&mut *conn, product_id, product_name, &draws).await?;

    debug!(product_id, branch_id, quantity, batches = draws.len(), "FEFO consumption applied");
    Ok(draws)
}

/// Applies planned draws. Each UPDATE only matches while the batch still
/// holds `take` units, so a batch changed since planning aborts the caller.
async fn apply_draws(
    conn: &mut SqliteConnection,
    product_id: i64,
    product_name: &str,
    draws: &[BatchDraw],
) -> DbResult<()> {
    for draw in draws {
        let result = sqlx::query(
            "UPDATE inventory SET quantity = quantity - ?1
             WHERE id = ?2 AND quantity >= ?1",
        )
        .bind(draw.take)
        .bind(draw.batch_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            warn!(batch_id = draw.batch_id, product_id, "Batch changed during consumption");
            return Err(DbError::TransactionFailed(format!(
                "stock for {} changed while the order was being placed",
                product_name
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Paged batch listing, scoped to the actor's branch unless Admin.
    pub async fn list(&self, actor: &User, filter: &InventoryFilter, page: Page) -> DbResult<Paged<InventoryRow>> {
        let branch = scoped_branch(actor, filter.branch_id)?;

        let build = |select: &str| {
            let mut qb = QueryBuilder::<Sqlite>::new(select);
            qb.push(
                " FROM inventory i
                  JOIN products p ON p.id = i.product_id
                  JOIN branches b ON b.id = i.branch_id
                  WHERE 1 = 1",
            );
            if let Some(b) = branch {
                qb.push(" AND i.branch_id = ").push_bind(b);
            }
            if let Some(term) = &filter.search {
                qb.push(" AND p.name LIKE ").push_bind(format!("%{}%", term));
            }
            if let Some(date) = filter.expiry_date {
                qb.push(" AND i.expiry_date IS NOT NULL AND i.expiry_date <= ").push_bind(date);
            }
            qb
        };

        let total: i64 = build("SELECT COUNT(*)").build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = build(
            "SELECT i.id, i.product_id, p.name AS product_name, i.branch_id,
                    b.name AS branch_name, i.quantity, i.expiry_date",
        );
        select
            .push(" ORDER BY i.expiry_date IS NULL, i.expiry_date, i.id LIMIT ")
            .push_bind(page.size)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let items: Vec<InventoryRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Paged::new(items, total, page))
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<InventoryBatch>> {
        let batch = sqlx::query_as::<_, InventoryBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM inventory WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(batch)
    }

    pub async fn create(&self, actor: &User, new: &NewBatch) -> DbResult<InventoryBatch> {
        ensure_branch_access(actor, new.branch_id)?;

        let mut tx = self.pool.begin().await?;
        let batch = sqlx::query_as::<_, InventoryBatch>(&format!(
            "INSERT INTO inventory (product_id, branch_id, quantity, expiry_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {BATCH_COLUMNS}"
        ))
        .bind(new.product_id)
        .bind(new.branch_id)
        .bind(new.quantity)
        .bind(new.expiry_date)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Create,
            Some(actor.id),
            format!(
                "Added batch {} of product {} ({} units) to branch {}",
                batch.id, batch.product_id, new.quantity, batch.branch_id
            ),
        )
        .await?;
        tx.commit().await?;

        info!(batch_id = batch.id, product_id = batch.product_id, "Inventory batch created");
        Ok(batch)
    }

    pub async fn update(&self, actor: &User, id: i64, update: &BatchUpdate) -> DbResult<InventoryBatch> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Inventory", id.to_string()))?;
        ensure_branch_access(actor, existing.branch_id)?;

        let mut tx = self.pool.begin().await?;
        let batch = sqlx::query_as::<_, InventoryBatch>(&format!(
            "UPDATE inventory SET quantity = ?1, expiry_date = ?2 WHERE id = ?3 RETURNING {BATCH_COLUMNS}"
        ))
        .bind(update.quantity)
        .bind(update.expiry_date)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        log::append(
            &mut tx,
            LogType::Update,
            Some(actor.id),
            format!("Updated batch {}: quantity {}", id, update.quantity),
        )
        .await?;
        tx.commit().await?;
        Ok(batch)
    }

    pub async fn delete(&self, actor: &User, id: i64) -> DbResult<()> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Inventory", id.to_string()))?;
        ensure_branch_access(actor, existing.branch_id)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM inventory WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        log::append(&mut tx, LogType::Delete, Some(actor.id), format!("Deleted batch {}", id)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Removes every expired batch of a branch. Returns the number removed.
    pub async fn dispose_expired(&self, actor: &User, branch_id: i64, today: NaiveDate) -> DbResult<u64> {
        ensure_branch_access(actor, branch_id)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "DELETE FROM inventory
             WHERE branch_id = ?1 AND expiry_date IS NOT NULL AND expiry_date < ?2",
        )
        .bind(branch_id)
        .bind(today)
        .execute(&mut *tx)
        .await?;
        let disposed = result.rows_affected();

        log::append(
            &mut tx,
            LogType::Disposal,
            Some(actor.id),
            format!("Disposed {} expired batches in branch {}", disposed, branch_id),
        )
        .await?;
        tx.commit().await?;

        info!(branch_id, disposed, "Expired inventory disposed");
        Ok(disposed)
    }

    /// Usable stock of a product in one branch.
    pub async fn available(&self, product_id: i64, branch_id: i64, today: NaiveDate) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        available_in_branch(&mut conn, product_id, branch_id, today).await
    }

    /// Usable stock of a product in every branch holding a batch of it.
    pub async fn availability_by_branch(&self, product_id: i64, today: NaiveDate) -> DbResult<Vec<BranchStock>> {
        let mut conn = self.pool.acquire().await?;
        let batches = batches_for(&mut conn, product_id, None).await?;

        let mut by_branch: BTreeMap<i64, Vec<InventoryBatch>> = BTreeMap::new();
        for batch in batches {
            by_branch.entry(batch.branch_id).or_default().push(batch);
        }

        Ok(by_branch
            .into_iter()
            .map(|(branch_id, batches)| BranchStock {
                branch_id,
                available: fefo::available_quantity(&batches, today),
            })
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, Fixture};
    use chrono::Duration;
    use pharma_core::validation::validate_page;
    use pharma_core::CoreError;

    fn batch_qty(batches: &[InventoryBatch], id: i64) -> Option<i64> {
        batches.iter().find(|b| b.id == id).and_then(|b| b.quantity)
    }

    #[tokio::test]
    async fn test_expired_and_empty_batches_do_not_count() {
        let Fixture { db, today, branch, product, .. } = fixture().await;
        let inv = db.inventory();

        crate::test_support::add_batch(&db, product, branch, Some(5), None).await;
        let before = inv.available(product, branch, today).await.unwrap();

        crate::test_support::add_batch(&db, product, branch, Some(10), Some(today - Duration::days(1))).await;
        crate::test_support::add_batch(&db, product, branch, Some(0), Some(today + Duration::days(30))).await;
        crate::test_support::add_batch(&db, product, branch, None, None).await;

        assert_eq!(inv.available(product, branch, today).await.unwrap(), before);
        assert_eq!(before, 5);
    }

    #[tokio::test]
    async fn test_fefo_drains_earliest_expiry_first() {
        let Fixture { db, today, branch, product, .. } = fixture().await;

        let undated = crate::test_support::add_batch(&db, product, branch, Some(10), None).await;
        let late = crate::test_support::add_batch(&db, product, branch, Some(4), Some(today + Duration::days(90))).await;
        let soon = crate::test_support::add_batch(&db, product, branch, Some(3), Some(today + Duration::days(10))).await;

        let mut tx = db.pool().begin().await.unwrap();
        let draws = consume_fefo(&mut tx, product, "Panadol", branch, 5, today).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(draws.len(), 2);
        let mut conn = db.pool().acquire().await.unwrap();
        let batches = batches_for(&mut conn, product, Some(branch)).await.unwrap();
        assert_eq!(batch_qty(&batches, soon), Some(0));
        assert_eq!(batch_qty(&batches, late), Some(2));
        assert_eq!(batch_qty(&batches, undated), Some(10));
    }

    #[tokio::test]
    async fn test_overdraw_fails_without_mutation() {
        let Fixture { db, today, branch, product, .. } = fixture().await;
        let a = crate::test_support::add_batch(&db, product, branch, Some(2), Some(today + Duration::days(5))).await;
        let b = crate::test_support::add_batch(&db, product, branch, Some(1), None).await;

        let mut tx = db.pool().begin().await.unwrap();
        let err = consume_fefo(&mut tx, product, "Panadol", branch, 4, today).await.unwrap_err();
        drop(tx);

        assert!(matches!(err, DbError::Rule(CoreError::InsufficientStock { available: 3, .. })));
        let mut conn = db.pool().acquire().await.unwrap();
        let batches = batches_for(&mut conn, product, Some(branch)).await.unwrap();
        assert_eq!(batch_qty(&batches, a), Some(2));
        assert_eq!(batch_qty(&batches, b), Some(1));
    }

    #[tokio::test]
    async fn test_batch_drained_after_planning_aborts() {
        let Fixture { db, today, branch, product, .. } = fixture().await;
        let soon = crate::test_support::add_batch(&db, product, branch, Some(2), Some(today + Duration::days(5))).await;
        let late = crate::test_support::add_batch(&db, product, branch, Some(4), Some(today + Duration::days(60))).await;

        let mut tx = db.pool().begin().await.unwrap();
        let batches = batches_for(&mut tx, product, Some(branch)).await.unwrap();
        let draws = fefo::plan_consumption("Panadol", &batches, 5, today).unwrap();
        assert_eq!(draws.len(), 2);

        // Another writer empties the later batch before the decrement lands.
        sqlx::query("UPDATE inventory SET quantity = 1 WHERE id = ?1")
            .bind(late)
            .execute(&mut *tx)
            .await
            .unwrap();

        let err = apply_draws(&mut tx, product, "Panadol", &draws).await.unwrap_err();
        assert!(matches!(err, DbError::TransactionFailed(ref msg) if msg.contains("Panadol")));
        drop(tx);

        let mut conn = db.pool().acquire().await.unwrap();
        let batches = batches_for(&mut conn, product, Some(branch)).await.unwrap();
        assert_eq!(batch_qty(&batches, soon), Some(2));
        assert_eq!(batch_qty(&batches, late), Some(4));
    }

    #[tokio::test]
    async fn test_manager_limited_to_own_branch() {
        let Fixture { db, today, branch, other_branch, product, manager, .. } = fixture().await;
        let inv = db.inventory();

        let own = NewBatch { product_id: product, branch_id: branch, quantity: 5, expiry_date: None };
        assert!(inv.create(&manager, &own).await.is_ok());

        let foreign = NewBatch { branch_id: other_branch, ..own };
        let err = inv.create(&manager, &foreign).await.unwrap_err();
        assert!(matches!(err, DbError::Forbidden(_)));

        let page = validate_page(None, None).unwrap();
        let filter = InventoryFilter { branch_id: Some(other_branch), ..Default::default() };
        assert!(matches!(inv.list(&manager, &filter, page).await, Err(DbError::Forbidden(_))));

        let listed = inv.list(&manager, &InventoryFilter::default(), page).await.unwrap();
        assert!(listed.items.iter().all(|r| r.branch_id == branch));
        assert_eq!(inv.available(product, branch, today).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dispose_expired_logs_count() {
        let Fixture { db, today, branch, product, admin, .. } = fixture().await;
        crate::test_support::add_batch(&db, product, branch, Some(3), Some(today - Duration::days(2))).await;
        crate::test_support::add_batch(&db, product, branch, Some(3), Some(today - Duration::days(1))).await;
        crate::test_support::add_batch(&db, product, branch, Some(3), Some(today)).await;

        let disposed = db.inventory().dispose_expired(&admin, branch, today).await.unwrap();
        assert_eq!(disposed, 2);

        let logs = db.logs().by_type(LogType::Disposal).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].description.contains("Disposed 2"));
    }

    #[tokio::test]
    async fn test_list_filters_by_expiry() {
        let Fixture { db, today, branch, product, admin, .. } = fixture().await;
        crate::test_support::add_batch(&db, product, branch, Some(3), Some(today + Duration::days(3))).await;
        crate::test_support::add_batch(&db, product, branch, Some(3), Some(today + Duration::days(60))).await;
        crate::test_support::add_batch(&db, product, branch, Some(3), None).await;

        let page = validate_page(None, None).unwrap();
        let filter = InventoryFilter {
            expiry_date: Some(today + Duration::days(7)),
            search: Some("Pana".into()),
            ..Default::default()
        };
        let rows = db.inventory().list(&admin, &filter, page).await.unwrap();
        assert_eq!(rows.total_count, 1);
        assert_eq!(rows.items[0].product_name, "Panadol");
    }
}
