//! SQLite pool setup and the `Database` handle that hands out repositories.
//!
//! Connections run in WAL mode so catalog reads keep going while a checkout
//! transaction holds the write lock.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::cart::CartRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::checkout::CheckoutRepository;
use crate::repository::inventory::InventoryRepository;
use crate::repository::log::LogRepository;
use crate::repository::order::OrderRepository;
use crate::repository::plan::PlanRepository;
use crate::repository::prescription::PrescriptionRepository;
use crate::repository::product::ProductRepository;
use crate::repository::report::ReportRepository;
use crate::repository::slot::SlotRepository;
use crate::repository::supplier_order::SupplierOrderRepository;
use crate::repository::user::UserRepository;
use crate::repository::wishlist::WishlistRepository;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created on first connect.
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a request waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Private in-memory database for tests. One connection, since every
    /// connection to `:memory:` would otherwise get its own empty database.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Cheap to clone; shared by every handler through `AppState`.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening database");

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Off by default in SQLite.
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Database pool created");

        migrations::run_migrations(&pool).await?;
        Ok(Database { pool })
    }

    /// Raw pool, for the seeder and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Categories, product types, suppliers, cities and branches.
    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository::new(self.pool.clone())
    }

    pub fn cart(&self) -> CartRepository {
        CartRepository::new(self.pool.clone())
    }

    pub fn wishlist(&self) -> WishlistRepository {
        WishlistRepository::new(self.pool.clone())
    }

    /// Delivery slots and their remaining capacity.
    pub fn slots(&self) -> SlotRepository {
        SlotRepository::new(self.pool.clone())
    }

    /// Transactional order placement.
    pub fn checkout(&self) -> CheckoutRepository {
        CheckoutRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn prescriptions(&self) -> PrescriptionRepository {
        PrescriptionRepository::new(self.pool.clone())
    }

    /// Prescription plans and their reminders.
    pub fn plans(&self) -> PlanRepository {
        PlanRepository::new(self.pool.clone())
    }

    pub fn supplier_orders(&self) -> SupplierOrderRepository {
        SupplierOrderRepository::new(self.pool.clone())
    }

    pub fn reports(&self) -> ReportRepository {
        ReportRepository::new(self.pool.clone())
    }

    pub fn logs(&self) -> LogRepository {
        LogRepository::new(self.pool.clone())
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    /// Called once on shutdown; repositories fail afterwards.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
