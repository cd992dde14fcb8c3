//! # HTTP Routes
//!
//! One module per area, all mounted under `/api/<Controller>`.
//!
//! | Controller | Who |
//! |------------|-----|
//! | Products, Categories, ProductTypes, Suppliers, Cities, Branches | anyone reads, Admin writes |
//! | Cart, Wishlist, Checkout, Orders, Prescription, PrescriptionPlan | customers |
//! | Inventory, SupplierOrders, Dashboard | employees (branch-scoped) |
//! | DeliveryRequests | Driver, Manager, Admin |
//! | Reports | Manager, Admin |
//! | Logs | Admin |

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use pharma_core::validation::{validate_page, Page};
use pharma_core::CoreError;

mod catalog;
mod inventory;
mod orders;
mod prescriptions;
mod shopping;
mod staff;

#[cfg(test)]
mod tests;

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(catalog::routes())
        .merge(inventory::routes())
        .merge(shopping::routes())
        .merge(orders::routes())
        .merge(prescriptions::routes())
        .merge(staff::routes())
        .route("/Auth/dev-token", post(dev_token));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `pageNumber` / `pageSize` query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageQuery {
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> ApiResult<Page> {
        paging(self.page_number, self.page_size)
    }
}

/// Paging for query structs that carry their own `pageNumber` / `pageSize`.
pub(crate) fn paging(number: Option<i64>, size: Option<i64>) -> ApiResult<Page> {
    validate_page(number, size).map_err(invalid)
}

/// Shorthand for validation failures raised in handlers.
pub(crate) fn invalid(e: pharma_core::ValidationError) -> ApiError {
    ApiError::from(CoreError::from(e))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    database: bool,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let database = state.db.health_check().await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(Health {
            status: if database { "ok" } else { "degraded" },
            database,
        }),
    )
}

#[derive(Deserialize)]
struct DevTokenRequest {
    email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DevTokenResponse {
    token: String,
    user_id: i64,
}

/// Issues a token for an existing account. Disabled unless `ENABLE_DEV_TOKENS`.
async fn dev_token(
    State(state): State<AppState>,
    Json(req): Json<DevTokenRequest>,
) -> ApiResult<Json<DevTokenResponse>> {
    if !state.config.enable_dev_tokens {
        return Err(ApiError::not_found("Route", "/api/Auth/dev-token"));
    }
    let user = state
        .db
        .users()
        .get_by_email(&req.email)
        .await?
        .ok_or_else(|| ApiError::not_found("User", &req.email))?;

    let token = state.jwt.generate_token(&user)?;
    info!(user_id = user.id, role = %user.role, "Dev token issued");
    Ok(Json(DevTokenResponse { token, user_id: user.id }))
}
