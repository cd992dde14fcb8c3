//! Customer shopping: cart, wishlist and delivery slots.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;

use super::invalid;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::{now, today, AppState};
use pharma_core::slots::SlotAvailability;
use pharma_core::validation::{validate_id, validate_optional_id};
use pharma_core::{CartItem, Slot, WishlistItem};
use pharma_db::repository::cart::CartLine;
use pharma_db::repository::slot::UrgentAvailability;
use pharma_db::repository::wishlist::WishlistLine;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Cart", get(cart).post(add_to_cart).delete(clear_cart))
        .route("/Cart/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/Wishlist", get(wishlist).post(add_to_wishlist))
        .route("/Wishlist/:id", delete(remove_wishlist_item))
        .route("/Wishlist/:id/move-to-cart", post(move_to_cart))
        .route("/Slots", get(slots))
        .route("/Slots/available", get(available_slots))
        .route("/Slots/urgent", get(urgent_slot))
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchQuery {
    branch_id: Option<i64>,
}

/// Cart lines with availability in the chosen branch, or across all branches.
async fn cart(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<BranchQuery>,
) -> ApiResult<Json<Vec<CartLine>>> {
    let customer = user.customer()?;
    validate_optional_id("branchId", q.branch_id).map_err(invalid)?;
    Ok(Json(state.db.cart().list(customer.id, q.branch_id, today()).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToCart {
    product_id: i64,
    quantity: i64,
    branch_id: Option<i64>,
}

async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AddToCart>,
) -> ApiResult<(StatusCode, Json<CartItem>)> {
    let customer = user.customer()?;
    validate_id("productId", req.product_id).map_err(invalid)?;
    validate_optional_id("branchId", req.branch_id).map_err(invalid)?;
    let item = state
        .db
        .cart()
        .add(customer.id, req.product_id, req.quantity, req.branch_id, today())
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateQuantity {
    quantity: i64,
    branch_id: Option<i64>,
}

async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateQuantity>,
) -> ApiResult<Json<CartItem>> {
    let customer = user.customer()?;
    validate_id("id", id).map_err(invalid)?;
    let item = state
        .db
        .cart()
        .update_quantity(customer.id, id, req.quantity, req.branch_id, today())
        .await?;
    Ok(Json(item))
}

async fn remove_cart_item(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let customer = user.customer()?;
    state.db.cart().remove(customer.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<StatusCode> {
    let customer = user.customer()?;
    state.db.cart().clear(customer.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Wishlist
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToWishlist {
    product_id: i64,
}

async fn wishlist(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<WishlistLine>>> {
    let customer = user.customer()?;
    Ok(Json(state.db.wishlist().list(customer.id).await?))
}

async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AddToWishlist>,
) -> ApiResult<(StatusCode, Json<WishlistItem>)> {
    let customer = user.customer()?;
    validate_id("productId", req.product_id).map_err(invalid)?;
    let item = state.db.wishlist().add(customer.id, req.product_id).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn remove_wishlist_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let customer = user.customer()?;
    state.db.wishlist().remove(customer.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<CartItem>)> {
    let customer = user.customer()?;
    let item = state.db.wishlist().move_to_cart(customer.id, id, today()).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

// =============================================================================
// Delivery slots
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotQuery {
    branch_id: i64,
    date: Option<NaiveDate>,
}

async fn slots(State(state): State<AppState>) -> ApiResult<Json<Vec<Slot>>> {
    Ok(Json(state.db.slots().list().await?))
}

/// Slots still bookable for `date` (default today) at a branch.
async fn available_slots(
    State(state): State<AppState>,
    Query(q): Query<SlotQuery>,
) -> ApiResult<Json<Vec<SlotAvailability>>> {
    validate_id("branchId", q.branch_id).map_err(invalid)?;
    let date = q.date.unwrap_or_else(today);
    Ok(Json(state.db.slots().available_slots(q.branch_id, date, now()).await?))
}

async fn urgent_slot(State(state): State<AppState>, Query(q): Query<SlotQuery>) -> ApiResult<Json<UrgentAvailability>> {
    validate_id("branchId", q.branch_id).map_err(invalid)?;
    Ok(Json(state.db.slots().urgent_availability(q.branch_id, now()).await?))
}
