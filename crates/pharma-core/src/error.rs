//! # Error Types
//!
//! Domain-specific error types for pharma-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  pharma-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── RejectionReason  - Why a checkout/plan request was refused        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  pharma-db errors (separate crate)                                     │
//! │  └── DbError          - Database failures, wraps CoreError as Rule     │
//! │                                                                         │
//! │  api errors (in app)                                                   │
//! │  └── ApiError         - What the SPA sees (code + message)             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → HTTP         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::checkout::CheckoutStage;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Not enough non-expired stock to cover a request.
    ///
    /// ## When This Occurs
    /// - FEFO planning for an order line finds fewer units than requested
    /// - A cart add/update asks for more than the branch holds
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Checkout (or a flow sharing its rules) was refused.
    ///
    /// ## User Workflow
    /// ```text
    /// POST /api/Checkout
    ///      │
    ///      ▼
    /// ReceivedCart → PrescriptionResolved → ShippingResolved → ...
    ///      │                 │
    ///      │                 └── no approved prescription
    ///      ▼
    /// CheckoutRejected { stage: ReceivedCart, reason: PrescriptionRequired }
    ///      │
    ///      ▼
    /// SPA shows the message and re-renders the cart
    /// ```
    #[error("{reason}")]
    CheckoutRejected {
        stage: CheckoutStage,
        reason: RejectionReason,
    },

    /// A status change that the lifecycle does not allow.
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// The (user, product) pair is already present.
    #[error("{what} is already in the {list}")]
    AlreadyListed { what: String, list: &'static str },

    /// A prescription plan cannot be created or kept.
    #[error("Prescription plan not allowed: {0}")]
    PlanNotAllowed(String),

    /// Product still referenced by inventory batches.
    #[error("Product {0} still has inventory batches; remove them first")]
    ProductInUse(i64),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Shorthand for a checkout rejection at a given stage.
    pub fn rejected(stage: CheckoutStage, reason: RejectionReason) -> Self {
        CoreError::CheckoutRejected { stage, reason }
    }
}

// =============================================================================
// Rejection Reason
// =============================================================================

/// Machine-readable reason a checkout was refused.
///
/// `code()` is what the SPA switches on; `Display` is the human message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Approved prescription is required for prescribed items")]
    PrescriptionRequired,

    #[error("Prescription upload requires both the prescription and CPR documents")]
    UploadMissingDocuments,

    #[error("Prescription upload requires a full delivery address")]
    UploadMissingAddress,

    #[error("Prescription not found")]
    PrescriptionNotFound,

    #[error("Prescription is not approved")]
    PrescriptionNotApproved,

    #[error("Approved prescription does not cover the prescribed items in the cart")]
    PrescriptionMismatch,

    #[error("Prescription has expired")]
    PrescriptionExpired,

    #[error("A pickup branch is required")]
    BranchRequired,

    #[error("A delivery address is required")]
    AddressRequired,

    #[error("No branch serves the selected city")]
    NoBranchForCity,

    #[error("Delivery date must be between today and 6 days from today")]
    InvalidDeliveryDate,

    #[error("A delivery slot is required")]
    SlotRequired,

    #[error("Selected delivery slot does not exist")]
    SlotNotFound,

    #[error("Selected delivery slot is full")]
    SlotFull,

    #[error("Selected delivery slot has already ended")]
    SlotEnded,

    #[error("Urgent delivery is not available at this time")]
    UrgentUnavailable,

    #[error("Online payment has not been completed")]
    PaymentNotCompleted,

    #[error("Some products are not available in the selected branch: {}", .0.join(", "))]
    ProductsUnavailable(Vec<String>),
}

impl RejectionReason {
    /// Stable code for programmatic handling in the SPA.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::EmptyCart => "EMPTY_CART",
            RejectionReason::PrescriptionRequired => "PRESCRIPTION_REQUIRED",
            RejectionReason::UploadMissingDocuments => "UPLOAD_MISSING_DOCUMENTS",
            RejectionReason::UploadMissingAddress => "UPLOAD_MISSING_ADDRESS",
            RejectionReason::PrescriptionNotFound => "PRESCRIPTION_NOT_FOUND",
            RejectionReason::PrescriptionNotApproved => "PRESCRIPTION_NOT_APPROVED",
            RejectionReason::PrescriptionMismatch => "PRESCRIPTION_MISMATCH",
            RejectionReason::PrescriptionExpired => "PRESCRIPTION_EXPIRED",
            RejectionReason::BranchRequired => "BRANCH_REQUIRED",
            RejectionReason::AddressRequired => "ADDRESS_REQUIRED",
            RejectionReason::NoBranchForCity => "NO_BRANCH_FOR_CITY",
            RejectionReason::InvalidDeliveryDate => "INVALID_DELIVERY_DATE",
            RejectionReason::SlotRequired => "SLOT_REQUIRED",
            RejectionReason::SlotNotFound => "SLOT_NOT_FOUND",
            RejectionReason::SlotFull => "SLOT_FULL",
            RejectionReason::SlotEnded => "SLOT_ENDED",
            RejectionReason::UrgentUnavailable => "URGENT_UNAVAILABLE",
            RejectionReason::PaymentNotCompleted => "PAYMENT_NOT_COMPLETED",
            RejectionReason::ProductsUnavailable(_) => "PRODUCTS_UNAVAILABLE",
        }
    }

    /// Names of products that could not be fulfilled, if any.
    pub fn unavailable_products(&self) -> Option<&[String]> {
        match self {
            RejectionReason::ProductsUnavailable(names) => Some(names),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any query runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
