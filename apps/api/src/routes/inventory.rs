//! Branch inventory: stock batches and expiry disposal.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{invalid, paging};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::{today, AppState};
use pharma_core::validation::{validate_expiry_not_past, validate_id, validate_optional_id, validate_search, validate_stock_quantity};
use pharma_core::{InventoryBatch, Role, User};
use pharma_db::repository::inventory::{BatchUpdate, InventoryFilter, InventoryRow, NewBatch};
use pharma_db::Paged;

const STOCK_ROLES: &[Role] = &[Role::Admin, Role::Manager, Role::Pharmacist];

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Inventory", axum::routing::get(list).post(create))
        .route("/Inventory/:id", put(update).delete(remove))
        .route("/Inventory/dispose-expired", post(dispose_expired))
}

fn stock_keeper(user: &AuthUser) -> ApiResult<&User> {
    user.require(STOCK_ROLES)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryQuery {
    search: Option<String>,
    branch_id: Option<i64>,
    expiry_date: Option<NaiveDate>,
    page_number: Option<i64>,
    page_size: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<InventoryQuery>,
) -> ApiResult<Json<Paged<InventoryRow>>> {
    let actor = stock_keeper(&user)?;
    let page = paging(q.page_number, q.page_size)?;
    validate_optional_id("branchId", q.branch_id).map_err(invalid)?;

    let filter = InventoryFilter {
        search: validate_search(q.search.as_deref()).map_err(invalid)?,
        branch_id: q.branch_id,
        expiry_date: q.expiry_date,
    };
    Ok(Json(state.db.inventory().list(actor, &filter, page).await?))
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewBatch>,
) -> ApiResult<(StatusCode, Json<InventoryBatch>)> {
    let actor = stock_keeper(&user)?;
    validate_id("productId", new.product_id).map_err(invalid)?;
    validate_id("branchId", new.branch_id).map_err(invalid)?;
    validate_stock_quantity(new.quantity).map_err(invalid)?;
    if let Some(expiry) = new.expiry_date {
        validate_expiry_not_past(expiry, today()).map_err(invalid)?;
    }

    let batch = state.db.inventory().create(actor, &new).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(update): Json<BatchUpdate>,
) -> ApiResult<Json<InventoryBatch>> {
    let actor = stock_keeper(&user)?;
    validate_id("id", id).map_err(invalid)?;
    validate_stock_quantity(update.quantity).map_err(invalid)?;
    Ok(Json(state.db.inventory().update(actor, id, &update).await?))
}

async fn remove(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let actor = stock_keeper(&user)?;
    state.db.inventory().delete(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisposeRequest {
    branch_id: i64,
}

#[derive(Serialize)]
struct DisposeResponse {
    disposed: u64,
}

async fn dispose_expired(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DisposeRequest>,
) -> ApiResult<Json<DisposeResponse>> {
    let actor = stock_keeper(&user)?;
    validate_id("branchId", req.branch_id).map_err(invalid)?;
    let disposed = state.db.inventory().dispose_expired(actor, req.branch_id, today()).await?;
    Ok(Json(DisposeResponse { disposed }))
}
