//! Prescriptions and the plans built on approved ones.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::warn;

use super::{invalid, PageQuery};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::{notify, Notification};
use crate::{today, AppState};
use pharma_core::validation::{validate_id, validate_name, validate_optional_id};
use pharma_core::{Approval, Prescription, PrescriptionPlan, Role, User};
use pharma_db::repository::plan::PlanRequest;
use pharma_db::repository::prescription::{
    ApprovalInput, ApprovalOutcome, PrescriptionDocuments, PrescriptionUploadRequest,
};
use pharma_db::Paged;

const REVIEWER_ROLES: &[Role] = &[Role::Pharmacist, Role::Admin];

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Prescription", get(my_prescriptions).post(upload))
        .route("/Prescription/pending", get(pending))
        .route("/Prescription/:id/documents", get(documents))
        .route("/Prescription/:id/approvals", get(approvals))
        .route("/Prescription/:id/approve", post(approve))
        .route("/Prescription/:id/reject", post(reject))
        .route("/PrescriptionPlan", get(my_plans).post(create_plan))
        .route("/PrescriptionPlan/eligible", get(eligible_approvals))
        .route("/PrescriptionPlan/:id", put(update_plan).delete(delete_plan))
}

// =============================================================================
// Prescriptions
// =============================================================================

/// The caller's prescriptions, with lapsed approvals already expired.
async fn my_prescriptions(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<Prescription>>> {
    let customer = user.customer()?;
    Ok(Json(state.db.prescriptions().list_for_user(customer.id, today()).await?))
}

async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PrescriptionUploadRequest>,
) -> ApiResult<(StatusCode, Json<Prescription>)> {
    let customer = user.customer()?;
    validate_name("name", &req.name).map_err(invalid)?;
    validate_optional_id("branchId", req.branch_id).map_err(invalid)?;
    let prescription = state.db.prescriptions().upload(customer, &req).await?;
    Ok((StatusCode::CREATED, Json(prescription)))
}

async fn pending(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<PageQuery>,
) -> ApiResult<Json<Paged<Prescription>>> {
    let reviewer = user.require(REVIEWER_ROLES)?;
    let page = q.page()?;
    Ok(Json(state.db.prescriptions().pending(reviewer, page).await?))
}

async fn documents(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<PrescriptionDocuments>> {
    validate_id("id", id).map_err(invalid)?;
    Ok(Json(state.db.prescriptions().documents(&user.0, id).await?))
}

/// Approvals of a prescription, visible to its owner and to reviewers.
async fn approvals(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<Json<Vec<Approval>>> {
    let prescription = state
        .db
        .prescriptions()
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Prescription", id))?;
    if prescription.user_id != user.0.id {
        user.require(REVIEWER_ROLES)?;
    }
    Ok(Json(state.db.prescriptions().approvals(id).await?))
}

async fn owner_email(state: &AppState, user_id: i64) -> ApiResult<Option<String>> {
    Ok(state.db.users().get_by_id(user_id).await?.map(|u: User| u.email))
}

async fn approve(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<ApprovalInput>,
) -> ApiResult<Json<ApprovalOutcome>> {
    let pharmacist = user.require(REVIEWER_ROLES)?;
    validate_id("id", id).map_err(invalid)?;
    validate_id("productId", input.product_id).map_err(invalid)?;

    let outcome = state.db.prescriptions().approve(pharmacist, id, &input, today()).await?;

    match owner_email(&state, outcome.prescription.user_id).await? {
        Some(email) => {
            notify(
                &*state.notifier,
                Notification::PrescriptionApproved {
                    email,
                    prescription_name: outcome.prescription.name.clone(),
                    order_id: outcome.order_id,
                },
            )
            .await
        }
        None => warn!(prescription_id = id, "Prescription owner missing"),
    }
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct RejectRequest {
    reason: String,
}

async fn reject(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<Prescription>> {
    let pharmacist = user.require(REVIEWER_ROLES)?;
    validate_id("id", id).map_err(invalid)?;

    let prescription = state.db.prescriptions().reject(pharmacist, id, &req.reason).await?;

    match owner_email(&state, prescription.user_id).await? {
        Some(email) => {
            notify(
                &*state.notifier,
                Notification::PrescriptionRejected {
                    email,
                    prescription_name: prescription.name.clone(),
                    reason: req.reason.trim().to_string(),
                },
            )
            .await
        }
        None => warn!(prescription_id = id, "Prescription owner missing"),
    }
    Ok(Json(prescription))
}

// =============================================================================
// Plans
// =============================================================================

async fn my_plans(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<PrescriptionPlan>>> {
    let customer = user.customer()?;
    Ok(Json(state.db.plans().list(customer.id, today()).await?))
}

/// Approved health-profile prescriptions not yet covered by a plan.
async fn eligible_approvals(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<Approval>>> {
    let customer = user.customer()?;
    Ok(Json(state.db.plans().eligible_approvals(customer.id, today()).await?))
}

async fn create_plan(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PlanRequest>,
) -> ApiResult<(StatusCode, Json<PrescriptionPlan>)> {
    let customer = user.customer()?;
    validate_id("approvalId", req.approval_id).map_err(invalid)?;
    validate_optional_id("branchId", req.branch_id).map_err(invalid)?;
    let plan = state
        .db
        .plans()
        .create(customer, &req, today(), state.config.plan_reminder_interval_days)
        .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn update_plan(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<PrescriptionPlan>> {
    let customer = user.customer()?;
    validate_id("id", id).map_err(invalid)?;
    validate_id("approvalId", req.approval_id).map_err(invalid)?;
    Ok(Json(state.db.plans().update(customer, id, &req, today()).await?))
}

async fn delete_plan(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let customer = user.customer()?;
    state.db.plans().delete(customer, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
