//! # Checkout Rules
//!
//! The pure half of order creation: everything that can be decided from
//! already-loaded rows, without touching the database.
//!
//! ## Checkout State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ReceivedCart                                                          │
//! │       │  split prescribed / non-prescribed lines                       │
//! │       ▼                                                                 │
//! │  PrescriptionResolved                                                  │
//! │       │  approved id validated, or upload checked                      │
//! │       ▼                                                                 │
//! │  ShippingResolved                                                      │
//! │       │  branch from pickup id or city, date/slot/urgent checked       │
//! │       ▼                                                                 │
//! │  InventoryValidated                                                    │
//! │       │  every line covered by non-expired branch stock                │
//! │       ▼                                                                 │
//! │  Committed        (one transaction: shipping, payment, order, lines,   │
//! │                    FEFO decrement, cart cleared)                        │
//! │                                                                         │
//! │  Any stage ──► Rejected { reason }   nothing persisted                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use ts_rs::TS;

use crate::error::RejectionReason;
use crate::money::Money;
use crate::types::{Approval, PaymentMethod, Prescription, PrescriptionStatus};

/// Flat fee added to delivery orders (1 BHD).
pub const DELIVERY_FEE: Money = Money::from_dinars(1);

/// How many days ahead a non-urgent delivery may be booked.
pub const DELIVERY_WINDOW_DAYS: i64 = 6;

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum CheckoutStage {
    ReceivedCart,
    PrescriptionResolved,
    ShippingResolved,
    InventoryValidated,
    Committed,
}

impl CheckoutStage {
    /// The stage that follows a successful step. `Committed` is terminal.
    pub fn next(self) -> CheckoutStage {
        match self {
            CheckoutStage::ReceivedCart => CheckoutStage::PrescriptionResolved,
            CheckoutStage::PrescriptionResolved => CheckoutStage::ShippingResolved,
            CheckoutStage::ShippingResolved => CheckoutStage::InventoryValidated,
            CheckoutStage::InventoryValidated => CheckoutStage::Committed,
            CheckoutStage::Committed => CheckoutStage::Committed,
        }
    }
}

impl fmt::Display for CheckoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum FulfillmentMode {
    Pickup,
    Delivery,
}

/// A delivery address typed into the checkout form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AddressInput {
    pub city_id: Option<i64>,
    #[serde(default)]
    pub block: String,
    #[serde(default)]
    pub road: String,
    #[serde(default)]
    pub building: String,
}

impl AddressInput {
    /// Every part of the address is present.
    pub fn is_complete(&self) -> bool {
        self.city_id.is_some()
            && !self.block.trim().is_empty()
            && !self.road.trim().is_empty()
            && !self.building.trim().is_empty()
    }
}

/// Prescription documents uploaded together with the order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PrescriptionUpload {
    pub name: String,
    #[serde(with = "crate::blob::optional", default)]
    #[ts(as = "Option<String>")]
    pub document: Option<Vec<u8>>,
    #[serde(with = "crate::blob::optional", default)]
    #[ts(as = "Option<String>")]
    pub cpr_document: Option<Vec<u8>>,
}

impl PrescriptionUpload {
    pub fn has_both_documents(&self) -> bool {
        self.document.as_ref().is_some_and(|d| !d.is_empty())
            && self.cpr_document.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// Body of `POST /api/Checkout`.
///
/// Carries no totals; the server computes them.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CheckoutRequest {
    pub mode: FulfillmentMode,
    /// Pickup branch.
    pub branch_id: Option<i64>,
    /// Deliver to the saved profile address.
    #[serde(default)]
    pub use_profile_address: bool,
    pub address: Option<AddressInput>,
    #[serde(default)]
    pub is_urgent: bool,
    #[ts(as = "Option<String>")]
    pub delivery_date: Option<NaiveDate>,
    pub slot_id: Option<i64>,
    pub payment_method: PaymentMethod,
    pub payment_session_id: Option<String>,
    pub approved_prescription_id: Option<i64>,
    pub prescription_upload: Option<PrescriptionUpload>,
}

// =============================================================================
// Lines
// =============================================================================

/// A cart line joined with the product's current data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CheckoutLine {
    pub product_id: i64,
    pub product_name: String,
    pub unit_price_fils: i64,
    pub quantity: i64,
    pub requires_prescription: bool,
    pub is_controlled: bool,
}

impl CheckoutLine {
    pub fn line_total(&self) -> Money {
        Money::from_fils(self.unit_price_fils).multiply_quantity(self.quantity)
    }
}

/// Splits lines into (prescribed, non-prescribed).
pub fn split_prescribed(lines: &[CheckoutLine]) -> (Vec<&CheckoutLine>, Vec<&CheckoutLine>) {
    lines.iter().partition(|l| l.requires_prescription)
}

// =============================================================================
// Prescription Resolution
// =============================================================================

/// How the prescribed lines of an order are covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrescriptionCoverage {
    /// No prescribed lines.
    NotNeeded,
    /// An existing approved prescription, still to be checked against rows.
    Approved(i64),
    /// A fresh upload, created Pending with the order.
    Upload,
}

/// Decides how prescribed lines are covered, before any lookup.
///
/// `delivery_address_complete` is true when delivery is chosen and either
/// the profile address or a complete typed address will be used.
pub fn resolve_coverage(
    has_prescribed_lines: bool,
    request: &CheckoutRequest,
    delivery_address_complete: bool,
) -> Result<PrescriptionCoverage, RejectionReason> {
    if !has_prescribed_lines {
        return Ok(PrescriptionCoverage::NotNeeded);
    }

    if let Some(id) = request.approved_prescription_id {
        return Ok(PrescriptionCoverage::Approved(id));
    }

    match &request.prescription_upload {
        Some(upload) => {
            if !upload.has_both_documents() {
                return Err(RejectionReason::UploadMissingDocuments);
            }
            if request.mode != FulfillmentMode::Delivery || !delivery_address_complete {
                return Err(RejectionReason::UploadMissingAddress);
            }
            Ok(PrescriptionCoverage::Upload)
        }
        None => Err(RejectionReason::PrescriptionRequired),
    }
}

/// Checks an existing prescription against the prescribed cart lines.
///
/// ## Rules
/// - Must belong to the user and be Approved
/// - The latest approval must not have expired
/// - A health prescription needs a declared health profile
/// - Approved quantities per product id must cover each prescribed line
pub fn validate_approved_prescription(
    prescription: &Prescription,
    approvals: &[Approval],
    user_id: i64,
    user_has_health_profile: bool,
    prescribed: &[&CheckoutLine],
    today: NaiveDate,
) -> Result<(), RejectionReason> {
    if prescription.user_id != user_id {
        return Err(RejectionReason::PrescriptionNotFound);
    }

    match prescription.status {
        PrescriptionStatus::Approved => {}
        PrescriptionStatus::Expired => return Err(RejectionReason::PrescriptionExpired),
        _ => return Err(RejectionReason::PrescriptionNotApproved),
    }

    if prescription.is_health && !user_has_health_profile {
        return Err(RejectionReason::PrescriptionMismatch);
    }

    let latest = approvals
        .iter()
        .max_by_key(|a| (a.created_at, a.id))
        .ok_or(RejectionReason::PrescriptionNotApproved)?;
    if latest.expiry_date < today {
        return Err(RejectionReason::PrescriptionExpired);
    }

    let mut approved_qty: HashMap<i64, i64> = HashMap::new();
    for approval in approvals {
        *approved_qty.entry(approval.product_id).or_default() += approval.quantity;
    }

    let covered = prescribed.iter().all(|line| {
        approved_qty
            .get(&line.product_id)
            .is_some_and(|qty| *qty >= line.quantity)
    });

    if covered {
        Ok(())
    } else {
        Err(RejectionReason::PrescriptionMismatch)
    }
}

// =============================================================================
// Shipping Rules
// =============================================================================

/// A non-urgent delivery date must fall in today..=today+6.
pub fn validate_delivery_date(date: NaiveDate, today: NaiveDate) -> Result<(), RejectionReason> {
    let last = today + Duration::days(DELIVERY_WINDOW_DAYS);
    if date < today || date > last {
        return Err(RejectionReason::InvalidDeliveryDate);
    }
    Ok(())
}

// =============================================================================
// Stock & Totals
// =============================================================================

/// Names of the lines the branch cannot cover.
pub fn find_shortfalls(lines: &[CheckoutLine], available: &HashMap<i64, i64>) -> Vec<String> {
    lines
        .iter()
        .filter(|l| available.get(&l.product_id).copied().unwrap_or(0) < l.quantity)
        .map(|l| l.product_name.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CheckoutTotals {
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub total: Money,
}

/// Authoritative totals from current product prices.
pub fn compute_totals(lines: &[CheckoutLine], is_delivery: bool) -> CheckoutTotals {
    let subtotal: Money = lines.iter().map(CheckoutLine::line_total).sum();
    let delivery_fee = if is_delivery { DELIVERY_FEE } else { Money::zero() };
    CheckoutTotals {
        subtotal,
        delivery_fee,
        total: subtotal + delivery_fee,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
