//! # API Error Type
//!
//! Unified error type for axum handlers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in QuickPharmaPlus                        │
//! │                                                                         │
//! │  Handler ── Result<Json<T>, ApiError>                                  │
//! │     │                                                                   │
//! │     ├── DbError::NotFound ─────────────────► 404 NOT_FOUND              │
//! │     ├── DbError::Forbidden ────────────────► 403 FORBIDDEN              │
//! │     ├── CoreError::Validation ─────────────► 400 VALIDATION_ERROR       │
//! │     ├── CoreError::CheckoutRejected ───────► 422 CHECKOUT_REJECTED      │
//! │     │                                         + details.reason          │
//! │     │                                         + details.unavailable...  │
//! │     ├── duplicates / stock ────────────────► 409                        │
//! │     └── sqlx / pool / anything else ───────► 500 (logged, generic text) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Response Body
//! ```json
//! {
//!   "code": "CHECKOUT_REJECTED",
//!   "message": "Some products are not available in the selected branch: Tramadol",
//!   "details": { "stage": "InventoryValidated", "reason": "PRODUCTS_UNAVAILABLE",
//!                "unavailableProducts": ["Tramadol"] }
//! }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use pharma_core::CoreError;
use pharma_db::DbError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,

    /// Extra structure for the SPA (checkout rejections).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input validation failed (400)
    ValidationError,

    /// Missing or invalid bearer token (401)
    Unauthenticated,

    /// Role or branch not allowed (403)
    Forbidden,

    /// Resource not found (404)
    NotFound,

    /// Duplicate entry or resource still referenced (409)
    Conflict,

    /// Insufficient stock (409)
    InsufficientStock,

    /// Checkout refused by a business rule (422)
    CheckoutRejected,

    /// Business rule error (422)
    BusinessLogic,

    /// Payment provider unreachable (502)
    PaymentError,

    /// Database operation failed (500)
    DatabaseError,

    /// Internal server error (500)
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict | ErrorCode::InsufficientStock => StatusCode::CONFLICT,
            ErrorCode::CheckoutRejected | ErrorCode::BusinessLogic => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::PaymentError => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        ApiError::new(ErrorCode::NotFound, format!("{} not found: {}", resource, id))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::ValidationError, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }
}

/// Converts database errors to API errors.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ApiError::not_found(&entity, id),
            DbError::UniqueViolation { field, value } => {
                ApiError::new(ErrorCode::Conflict, format!("{} '{}' already exists", field, value))
            }
            DbError::ForeignKeyViolation { message } => {
                tracing::warn!("Foreign key violation: {}", message);
                ApiError::validation("Invalid reference")
            }
            DbError::Rule(core) => ApiError::from(core),
            DbError::Forbidden(message) => ApiError::forbidden(message),
            DbError::ConnectionFailed(_) => ApiError::new(ErrorCode::DatabaseError, "Database connection failed"),
            DbError::MigrationFailed(_) => ApiError::new(ErrorCode::DatabaseError, "Database migration failed"),
            DbError::PoolExhausted => ApiError::new(ErrorCode::DatabaseError, "Database pool exhausted"),
            DbError::QueryFailed(e) => {
                // Log the actual error but return a generic message
                tracing::error!("Database query failed: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
            DbError::TransactionFailed(e) => {
                tracing::error!("Transaction failed: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database transaction failed")
            }
            DbError::Internal(e) => {
                tracing::error!("Internal database error: {}", e);
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

/// Converts core errors to API errors.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::InsufficientStock { product, available, requested } => {
                ApiError::new(ErrorCode::InsufficientStock, message).with_details(json!({
                    "product": product,
                    "available": available,
                    "requested": requested,
                }))
            }
            CoreError::CheckoutRejected { stage, reason } => {
                let mut details = json!({ "stage": stage, "reason": reason.code() });
                if let Some(names) = reason.unavailable_products() {
                    details["unavailableProducts"] = json!(names);
                }
                ApiError::new(ErrorCode::CheckoutRejected, message).with_details(details)
            }
            CoreError::AlreadyListed { .. } | CoreError::ProductInUse(_) => ApiError::new(ErrorCode::Conflict, message),
            CoreError::InvalidTransition { .. } | CoreError::PlanNotAllowed(_) => {
                ApiError::new(ErrorCode::BusinessLogic, message)
            }
            CoreError::Validation(e) => ApiError::validation(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
