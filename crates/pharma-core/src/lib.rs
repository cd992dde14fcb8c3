//! # pharma-core: Pure Business Rules for QuickPharmaPlus
//!
//! Every rule the storefront and staff tooling enforce, as plain functions
//! over already-loaded rows. No database, no network, no clock: callers pass
//! `today` / `now` explicitly.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     QuickPharmaPlus Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    React SPA                                    │   │
//! │  │    Catalog ──► Cart ──► Checkout ──► Prescriptions ──► Plans   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ JSON over /api/<Controller>            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    apps/api (axum)                              │   │
//! │  │    auth claims, input validation, notifier, payment gateway     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ pharma-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌──────────────────┐    │   │
//! │  │   │  fefo   │ │  slots  │ │ checkout │ │  prescription    │    │   │
//! │  │   │ batches │ │capacity │ │  stages  │ │  lifecycle/plan  │    │   │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └──────────────────┘    │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    pharma-db (Database Layer)                   │   │
//! │  │         SQLite queries, migrations, transactional checkout       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain rows (Product, InventoryBatch, Order, Prescription, ...)
//! - [`money`] - Money in fils, integer arithmetic only
//! - [`error`] - CoreError, RejectionReason, ValidationError
//! - [`validation`] - Request validation (ids, search terms, paging)
//! - [`fefo`] - Stock availability and first-expiring-first-out planning
//! - [`slots`] - Delivery slot capacity and urgent slot derivation
//! - [`checkout`] - Checkout stages, coverage, shipping and totals
//! - [`prescription`] - Prescription transitions, expiry sweep, plan totals
//! - [`health`] - Allergy/illness ingredient warnings
//! - [`blob`] - base64 serde helpers for uploaded documents
//!
//! ## Example Usage
//!
//! ```rust
//! use pharma_core::money::Money;
//! use pharma_core::checkout::DELIVERY_FEE;
//!
//! let subtotal = Money::from_fils(2_350);
//! assert_eq!((subtotal + DELIVERY_FEE).to_string(), "BHD 3.350");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod blob;
pub mod checkout;
pub mod error;
pub mod fefo;
pub mod health;
pub mod money;
pub mod prescription;
pub mod slots;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, RejectionReason, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single product per cart line.
pub const MAX_ITEM_QUANTITY: i64 = 100;

/// Page size used when the client does not send one.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound on `pageSize`.
pub const MAX_PAGE_SIZE: i64 = 100;
