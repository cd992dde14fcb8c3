//! # Repository Module
//!
//! Database repository implementations for QuickPharmaPlus.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Request → Repository → SQLite                        │
//! │                                                                         │
//! │  axum handler                                                          │
//! │       │                                                                 │
//! │       │  state.db.checkout().place_order(&user, &request, ...)         │
//! │       ▼                                                                 │
//! │  CheckoutRepository                                                    │
//! │  ├── loads rows (cart, prescription, slots, batches)                   │
//! │  ├── asks pharma-core to decide                                        │
//! │  └── writes everything in ONE sqlx::Transaction                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  A repository never holds a connection between calls: every method     │
//! │  borrows one from the pool (or opens its own transaction) and gives    │
//! │  it back before returning.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Catalog search, product CRUD, health warnings
//! - [`CatalogRepository`](catalog::CatalogRepository) - Categories, types, suppliers, cities, branches
//! - [`InventoryRepository`](inventory::InventoryRepository) - Batches, availability, FEFO, disposal
//! - [`CartRepository`](cart::CartRepository) / [`WishlistRepository`](wishlist::WishlistRepository)
//! - [`SlotRepository`](slot::SlotRepository) - Delivery capacity
//! - [`CheckoutRepository`](checkout::CheckoutRepository) - Transactional order creation
//! - [`OrderRepository`](order::OrderRepository) - Order history and delivery requests
//! - [`PrescriptionRepository`](prescription::PrescriptionRepository) - Upload, approve, reject, expiry sweep
//! - [`PlanRepository`](plan::PlanRepository) - Prescription plans and reminders
//! - [`SupplierOrderRepository`](supplier_order::SupplierOrderRepository)
//! - [`ReportRepository`](report::ReportRepository) - Dashboards and revenue
//! - [`LogRepository`](log::LogRepository) - Audit trail
//! - [`UserRepository`](user::UserRepository) - Users and addresses

use serde::Serialize;
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use pharma_core::validation::Page;
use pharma_core::{Role, User};

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod inventory;
pub mod log;
pub mod order;
pub mod plan;
pub mod prescription;
pub mod product;
pub mod report;
pub mod slot;
pub mod supplier_order;
pub mod user;
pub mod wishlist;

/// Admins act on every branch; other staff only on their own.
pub(crate) fn ensure_branch_access(actor: &User, branch_id: i64) -> DbResult<()> {
    if actor.role == Role::Admin || actor.branch_id == Some(branch_id) {
        Ok(())
    } else {
        Err(DbError::forbidden(format!(
            "{} {} cannot act on branch {}",
            actor.role, actor.id, branch_id
        )))
    }
}

/// The branch a staff member's listing is scoped to: an Admin may pick any
/// (or none), everyone else is pinned to their own.
pub(crate) fn scoped_branch(actor: &User, requested: Option<i64>) -> DbResult<Option<i64>> {
    if actor.role == Role::Admin {
        return Ok(requested);
    }
    let own = actor
        .branch_id
        .ok_or_else(|| DbError::forbidden("Employee branch not found"))?;
    match requested {
        Some(b) if b != own => Err(DbError::forbidden(format!(
            "{} {} cannot view branch {}",
            actor.role, actor.id, b
        ))),
        _ => Ok(Some(own)),
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page_number: i64,
    pub page_size: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total_count: i64, page: Page) -> Self {
        Paged {
            items,
            total_count,
            page_number: page.number,
            page_size: page.size,
        }
    }
}
