//! Checkout, order history and the delivery queue.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use super::invalid;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::{notify, Notification};
use crate::{now, AppState};
use pharma_core::checkout::CheckoutRequest;
use pharma_core::validation::{validate_id, validate_optional_id};
use pharma_core::{Order, OrderStatus, PaymentMethod, Role};
use pharma_db::repository::order::{DeliveryRequest, OrderDetail};
use pharma_db::PlacedOrder;

const DELIVERY_ROLES: &[Role] = &[Role::Driver, Role::Manager, Role::Admin];

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Checkout", post(checkout))
        .route("/Orders", get(my_orders))
        .route("/Orders/:id", get(order_detail))
        .route("/DeliveryRequests", get(delivery_requests))
        .route("/DeliveryRequests/:id/status", put(update_delivery_status))
}

/// Places an order from the caller's cart.
///
/// Online payments are confirmed with the provider first; the checkout
/// transaction only sees the verdict.
async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<PlacedOrder>)> {
    let customer = user.customer()?;
    validate_optional_id("branchId", request.branch_id).map_err(invalid)?;
    validate_optional_id("slotId", request.slot_id).map_err(invalid)?;

    let payment_verified = match (request.payment_method, request.payment_session_id.as_deref()) {
        (PaymentMethod::Online, Some(session)) if !session.trim().is_empty() => {
            state.payments.is_paid(session).await?
        }
        _ => false,
    };

    let placed = state
        .db
        .checkout()
        .place_order(customer, &request, payment_verified, now())
        .await?;

    info!(
        order_id = placed.order_id,
        user_id = customer.id,
        total = %placed.totals.total,
        "Order placed"
    );
    notify(
        &*state.notifier,
        Notification::OrderPlaced {
            email: customer.email.clone(),
            order_id: placed.order_id,
            total_fils: placed.totals.total.fils(),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(placed)))
}

async fn my_orders(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<Order>>> {
    let customer = user.customer()?;
    Ok(Json(state.db.orders().list_for_user(customer.id).await?))
}

async fn order_detail(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<Json<OrderDetail>> {
    validate_id("id", id).map_err(invalid)?;
    Ok(Json(state.db.orders().get(&user.0, id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryQuery {
    branch_id: Option<i64>,
}

async fn delivery_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<DeliveryQuery>,
) -> ApiResult<Json<Vec<DeliveryRequest>>> {
    let actor = user.require(DELIVERY_ROLES)?;
    validate_optional_id("branchId", q.branch_id).map_err(invalid)?;
    Ok(Json(state.db.orders().delivery_requests(actor, q.branch_id).await?))
}

#[derive(Deserialize)]
struct StatusUpdate {
    status: OrderStatus,
}

/// Advances a delivery and tells the customer.
async fn update_delivery_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Order>> {
    let actor = user.require(DELIVERY_ROLES)?;
    validate_id("id", id).map_err(invalid)?;
    let order = state.db.orders().update_status(actor, id, update.status).await?;

    match state.db.users().get_by_id(order.user_id).await? {
        Some(owner) => {
            notify(
                &*state.notifier,
                Notification::OrderStatusChanged {
                    email: owner.email,
                    order_id: order.id,
                    status: order.status.to_string(),
                },
            )
            .await
        }
        None => warn!(order_id = order.id, "Order owner missing, status notification skipped"),
    }

    Ok(Json(order))
}
