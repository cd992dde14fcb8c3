//! # pharma-db: Database Layer for QuickPharmaPlus
//!
//! This crate provides database access for the QuickPharmaPlus backend.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     QuickPharmaPlus Data Flow                           │
//! │                                                                         │
//! │  axum handler (POST /api/Checkout)                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     pharma-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ CheckoutRepo   │   │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ Prescription.. │   │ 002_slots    │  │   │
//! │  │   │               │    │ PlanRepo ...   │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   DATABASE_PATH (default ./quickpharma.db)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pharma_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("quickpharma.db")).await?;
//! let placed = db.checkout().place_order(&user, &request, verified, now).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::Paged;

// Repository re-exports for convenience
pub use repository::cart::CartRepository;
pub use repository::checkout::{CheckoutRepository, PlacedOrder};
pub use repository::plan::PlanRepository;
pub use repository::prescription::PrescriptionRepository;
pub use repository::product::ProductRepository;
