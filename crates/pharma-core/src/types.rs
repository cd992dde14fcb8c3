//! # Domain Types
//!
//! Core domain types used throughout QuickPharmaPlus.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Catalog            Stock               Fulfilment                      │
//! │  ───────            ─────               ──────────                      │
//! │  Product            InventoryBatch      Shipping ── Slot                │
//! │  Category           (branch, expiry)    Payment                         │
//! │  ProductType                            Order ── ProductOrder           │
//! │  Supplier           CartItem                                            │
//! │                     WishlistItem        Prescriptions                   │
//! │  People                                 ─────────────                   │
//! │  ──────             Staff               Prescription ── Approval        │
//! │  User (Role)        ─────                     │                         │
//! │  Address ── City    SupplierOrder             ▼                         │
//! │  Branch             Log                 PrescriptionPlan                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers are database-assigned integers. Monetary fields are fils.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Roles
// =============================================================================

/// Role carried in the bearer token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum Role {
    Customer,
    Admin,
    Manager,
    Pharmacist,
    Driver,
}

impl Role {
    /// Staff roles work inside a branch; customers do not.
    pub fn is_employee(&self) -> bool {
        !matches!(self, Role::Customer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// People & Places
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    /// Branch of an employee. Always `None` for customers.
    pub branch_id: Option<i64>,
    /// Saved profile address used for delivery by default.
    pub profile_address_id: Option<i64>,
    /// Whether the user has declared a health profile.
    pub has_health_profile: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub city_id: Option<i64>,
}

/// A city, and the branch that serves deliveries to it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Address {
    pub id: i64,
    pub user_id: Option<i64>,
    pub city_id: i64,
    pub block: String,
    pub road: String,
    pub building: String,
    /// Profile addresses survive plan/order deletion.
    pub is_profile: bool,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
}

/// A product listed in the storefront.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Current price in fils. Orders always re-read this at checkout.
    pub price_fils: i64,
    /// Controlled substances get a dedicated dispensation log entry.
    pub is_controlled: bool,
    /// Lines for these products need an approved or uploaded prescription.
    pub requires_prescription: bool,
    pub category_id: i64,
    pub product_type_id: i64,
    pub supplier_id: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_fils(self.price_fils)
    }
}

// =============================================================================
// Stock
// =============================================================================

/// One stock batch of a product in a branch.
///
/// A batch at quantity 0 is inert but kept; only explicit deletion or the
/// expiry disposal workflow removes rows.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InventoryBatch {
    pub id: i64,
    pub product_id: i64,
    pub branch_id: i64,
    /// `None` is treated as zero.
    pub quantity: Option<i64>,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl InventoryBatch {
    /// Whether the batch may be sold on `today`.
    pub fn is_usable(&self, today: NaiveDate) -> bool {
        self.quantity.unwrap_or(0) > 0 && self.expiry_date.map_or(true, |exp| exp >= today)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CartItem {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WishlistItem {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Fulfilment
// =============================================================================

/// A named delivery time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Slot {
    pub id: i64,
    pub name: String,
    #[ts(as = "String")]
    pub start_time: NaiveTime,
    #[ts(as = "String")]
    pub end_time: NaiveTime,
}

/// One fulfilment leg: pickup at a branch, or delivery from it.
///
/// `slot_id` is set only for non-urgent deliveries. Urgent deliveries keep
/// the derived `delivery_time` instead.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Shipping {
    pub id: i64,
    pub branch_id: i64,
    pub is_delivery: bool,
    pub is_urgent: bool,
    pub address_id: Option<i64>,
    pub slot_id: Option<i64>,
    #[ts(as = "Option<String>")]
    pub delivery_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub delivery_time: Option<NaiveTime>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum PaymentMethod {
    /// Cash on pickup/delivery. Always succeeds at checkout.
    Cash,
    /// Paid through the external payment session before checkout.
    Online,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Payment {
    pub id: i64,
    pub method: PaymentMethod,
    pub amount_fils: i64,
    pub is_successful: bool,
    pub session_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Allowed transitions for the delivery workflow.
    ///
    /// ```text
    /// Pending ──► Confirmed ──► OutForDelivery ──► Delivered
    ///    │            │
    ///    │            └──► ReadyForPickup ──► Delivered
    ///    └────────────┴──► Cancelled
    /// ```
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, OutForDelivery)
                | (Confirmed, OutForDelivery)
                | (Confirmed, ReadyForPickup)
                | (OutForDelivery, Delivered)
                | (ReadyForPickup, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A placed order. `total_fils` is always computed on the server.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub shipping_id: i64,
    pub payment_id: i64,
    pub status: OrderStatus,
    pub total_fils: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One distinct product within an order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductOrder {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    /// Unit price frozen at checkout.
    pub unit_price_fils: i64,
    pub prescription_id: Option<i64>,
}

// =============================================================================
// Prescriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum PrescriptionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A prescription as listed; the document blobs are loaded separately.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Prescription {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub status: PrescriptionStatus,
    /// Belongs to the user's health profile and may back a plan.
    pub is_health: bool,
    pub is_delivery: bool,
    pub branch_id: Option<i64>,
    pub address_id: Option<i64>,
    pub rejection_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Pharmacist decision on a prescription.
///
/// Holds the product id (matching is id-based) plus a name snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Approval {
    pub id: i64,
    pub prescription_id: i64,
    pub pharmacist_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub dosage: String,
    #[ts(as = "String")]
    pub expiry_date: NaiveDate,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum PlanStatus {
    Ongoing,
    Expired,
}

/// Recurring fulfilment derived from an approval.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PrescriptionPlan {
    pub id: i64,
    pub user_id: i64,
    pub approval_id: i64,
    pub shipping_id: i64,
    pub status: PlanStatus,
    pub total_fils: i64,
    #[ts(as = "String")]
    pub next_reminder_date: NaiveDate,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Staff
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum SupplierOrderStatus {
    Pending,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SupplierOrder {
    pub id: i64,
    pub supplier_id: i64,
    pub product_id: i64,
    pub branch_id: i64,
    pub employee_id: i64,
    pub quantity: i64,
    pub status: SupplierOrderStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
}

/// Category of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "PascalCase"))]
#[ts(export)]
pub enum LogType {
    Create,
    Update,
    Delete,
    Checkout,
    Approval,
    Rejection,
    ControlledDispensation,
    Disposal,
    Plan,
    SupplierOrder,
    Delivery,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Log {
    pub id: i64,
    pub log_type: LogType,
    pub user_id: Option<i64>,
    pub description: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(quantity: Option<i64>, expiry: Option<NaiveDate>) -> InventoryBatch {
        InventoryBatch {
            id: 1,
            product_id: 1,
            branch_id: 1,
            quantity,
            expiry_date: expiry,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_batch_usability() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let yesterday = today.pred_opt().unwrap();

        assert!(batch(Some(5), None).is_usable(today));
        assert!(batch(Some(5), Some(today)).is_usable(today));
        assert!(!batch(Some(5), Some(yesterday)).is_usable(today));
        assert!(!batch(Some(0), None).is_usable(today));
        assert!(!batch(None, None).is_usable(today));
    }

    #[test]
    fn test_order_status_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::OutForDelivery));
        assert!(OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_role_is_employee() {
        assert!(!Role::Customer.is_employee());
        assert!(Role::Driver.is_employee());
        assert!(Role::Admin.is_employee());
    }
}
