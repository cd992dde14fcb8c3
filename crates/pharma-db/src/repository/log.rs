//! # Audit Log Repository
//!
//! Append-only record of mutating operations. Entries are written through
//! [`append`] on the same connection (usually the same transaction) as the
//! change they describe, so a rolled-back change leaves no log behind.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::Paged;
use pharma_core::validation::Page;
use pharma_core::{Log, LogType};

/// Writes one audit entry on `conn`.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    log_type: LogType,
    user_id: Option<i64>,
    description: impl AsRef<str>,
) -> DbResult<()> {
    let description = description.as_ref();
    debug!(?log_type, ?user_id, %description, "Audit log");

    sqlx::query(
        "INSERT INTO logs (log_type, user_id, description, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(log_type)
    .bind(user_id)
    .bind(description)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LogRepository { pool }
    }

    /// Newest first, optionally filtered by type.
    pub async fn list(&self, log_type: Option<LogType>, page: Page) -> DbResult<Paged<Log>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM logs");
        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT id, log_type, user_id, description, created_at FROM logs",
        );
        if let Some(t) = log_type {
            count.push(" WHERE log_type = ").push_bind(t);
            select.push(" WHERE log_type = ").push_bind(t);
        }
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.size)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        let items: Vec<Log> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Paged::new(items, total, page))
    }

    /// Entries of one type, oldest first. Used by tests and the admin log view.
    pub async fn by_type(&self, log_type: LogType) -> DbResult<Vec<Log>> {
        let logs = sqlx::query_as::<_, Log>(
            "SELECT id, log_type, user_id, description, created_at
             FROM logs WHERE log_type = ?1 ORDER BY id",
        )
        .bind(log_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
