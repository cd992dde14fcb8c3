//! Embedded SQL migrations from `migrations/sqlite/`.
//!
//! Files are applied in filename order and recorded in `_sqlx_migrations`.
//! Never edit an applied migration; add the next `NNN_description.sql`.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every pending migration. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!(embedded = MIGRATOR.migrations.len(), "Applying pending migrations");
    MIGRATOR.run(pool).await?;
    Ok(())
}
