//! Back office: supplier orders, dashboard, reports and the audit log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{invalid, paging};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::{today, AppState};
use pharma_core::validation::{validate_id, validate_optional_id, validate_stock_quantity};
use pharma_core::{Log, LogType, Role, SupplierOrder};
use pharma_db::repository::report::{Dashboard, RevenueReport};
use pharma_db::repository::supplier_order::NewSupplierOrder;
use pharma_db::Paged;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/SupplierOrders", get(supplier_orders).post(create_supplier_order))
        .route("/SupplierOrders/:id/receive", post(receive_supplier_order))
        .route("/SupplierOrders/:id/cancel", post(cancel_supplier_order))
        .route("/Dashboard", get(dashboard))
        .route("/Reports/revenue", get(revenue))
        .route("/Logs", get(logs))
}

// =============================================================================
// Supplier orders
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchQuery {
    branch_id: Option<i64>,
}

async fn supplier_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<BranchQuery>,
) -> ApiResult<Json<Vec<SupplierOrder>>> {
    let employee = user.employee()?;
    validate_optional_id("branchId", q.branch_id).map_err(invalid)?;
    Ok(Json(state.db.supplier_orders().list(employee, q.branch_id).await?))
}

async fn create_supplier_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewSupplierOrder>,
) -> ApiResult<(StatusCode, Json<SupplierOrder>)> {
    let employee = user.employee()?;
    validate_id("supplierId", new.supplier_id).map_err(invalid)?;
    validate_id("productId", new.product_id).map_err(invalid)?;
    validate_optional_id("branchId", new.branch_id).map_err(invalid)?;
    validate_stock_quantity(new.quantity).map_err(invalid)?;

    let order = state.db.supplier_orders().create(employee, &new).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveRequest {
    expiry_date: Option<NaiveDate>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Received {
    order: SupplierOrder,
    batch_id: i64,
}

/// Marks a delivery from the supplier as received and stocks it.
async fn receive_supplier_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ReceiveRequest>,
) -> ApiResult<Json<Received>> {
    let employee = user.employee()?;
    validate_id("id", id).map_err(invalid)?;
    let (order, batch_id) = state
        .db
        .supplier_orders()
        .receive(employee, id, req.expiry_date, today())
        .await?;
    Ok(Json(Received { order, batch_id }))
}

async fn cancel_supplier_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<SupplierOrder>> {
    let employee = user.employee()?;
    validate_id("id", id).map_err(invalid)?;
    Ok(Json(state.db.supplier_orders().cancel(employee, id).await?))
}

// =============================================================================
// Dashboard & reports
// =============================================================================

async fn dashboard(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Dashboard>> {
    let employee = user.employee()?;
    Ok(Json(state.db.reports().dashboard(employee, today()).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevenueQuery {
    from: NaiveDate,
    to: NaiveDate,
    branch_id: Option<i64>,
}

async fn revenue(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<RevenueQuery>,
) -> ApiResult<Json<RevenueReport>> {
    let actor = user.require(&[Role::Manager, Role::Admin])?;
    validate_optional_id("branchId", q.branch_id).map_err(invalid)?;
    Ok(Json(state.db.reports().revenue(actor, q.from, q.to, q.branch_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogQuery {
    log_type: Option<LogType>,
    page_number: Option<i64>,
    page_size: Option<i64>,
}

async fn logs(State(state): State<AppState>, user: AuthUser, Query(q): Query<LogQuery>) -> ApiResult<Json<Paged<Log>>> {
    user.admin()?;
    let page = paging(q.page_number, q.page_size)?;
    Ok(Json(state.db.logs().list(q.log_type, page).await?))
}
