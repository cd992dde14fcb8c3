//! Catalog endpoints: products and their lookup tables.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use super::{invalid, paging};
use crate::auth::{AuthUser, MaybeUser};
use crate::error::{ApiError, ApiResult};
use crate::{today, AppState};
use pharma_core::validation::{validate_id, validate_name, validate_optional_id, validate_price_fils, validate_search};
use pharma_core::{Branch, Category, City, Product, ProductType, Role, Supplier};
use pharma_db::repository::product::{ProductDetail, ProductFilter, ProductInput};
use pharma_db::Paged;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/Products", get(search_products).post(create_product))
        .route("/Products/:id", get(product_detail).put(update_product).delete(delete_product))
        .route("/Categories", get(list_categories).post(create_category))
        .route("/Categories/:id/image", get(category_image))
        .route("/ProductTypes", get(list_product_types).post(create_product_type))
        .route("/Suppliers", get(list_suppliers).post(create_supplier))
        .route("/Cities", get(list_cities))
        .route("/Branches", get(list_branches))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductQuery {
    search: Option<String>,
    category_id: Option<i64>,
    product_type_id: Option<i64>,
    supplier_id: Option<i64>,
    page_number: Option<i64>,
    page_size: Option<i64>,
}

async fn search_products(
    State(state): State<AppState>,
    Query(q): Query<ProductQuery>,
) -> ApiResult<Json<Paged<Product>>> {
    let page = paging(q.page_number, q.page_size)?;
    validate_optional_id("categoryId", q.category_id).map_err(invalid)?;
    validate_optional_id("productTypeId", q.product_type_id).map_err(invalid)?;
    validate_optional_id("supplierId", q.supplier_id).map_err(invalid)?;

    let filter = ProductFilter {
        search: validate_search(q.search.as_deref()).map_err(invalid)?,
        category_id: q.category_id,
        product_type_id: q.product_type_id,
        supplier_id: q.supplier_id,
    };
    Ok(Json(state.db.products().search(&filter, page).await?))
}

/// Product page. Signed-in viewers also get their health warnings.
async fn product_detail(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ProductDetail>> {
    validate_id("id", id).map_err(invalid)?;
    let detail = state.db.products().detail(id, viewer.map(|u| u.id), today()).await?;
    Ok(Json(detail))
}

fn validate_product(input: &ProductInput) -> ApiResult<()> {
    validate_name("name", &input.name).map_err(invalid)?;
    validate_price_fils(input.price_fils).map_err(invalid)?;
    validate_id("categoryId", input.category_id).map_err(invalid)?;
    validate_id("productTypeId", input.product_type_id).map_err(invalid)?;
    validate_optional_id("supplierId", input.supplier_id).map_err(invalid)?;
    if input.is_controlled && !input.requires_prescription {
        return Err(ApiError::validation("Controlled products must require a prescription"));
    }
    Ok(())
}

async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<ProductInput>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let admin = user.admin()?;
    validate_product(&input)?;
    let product = state.db.products().create(admin.id, &input).await?;
    info!(product_id = product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<ProductInput>,
) -> ApiResult<Json<Product>> {
    let admin = user.admin()?;
    validate_id("id", id).map_err(invalid)?;
    validate_product(&input)?;
    Ok(Json(state.db.products().update(admin.id, id, &input).await?))
}

async fn delete_product(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let admin = user.admin()?;
    state.db.products().delete(admin.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct NewCategory {
    name: String,
    #[serde(default, with = "pharma_core::blob::optional")]
    image: Option<Vec<u8>>,
}

async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(state.db.catalog().categories().await?))
}

async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NewCategory>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let admin = user.admin()?;
    validate_name("name", &new.name).map_err(invalid)?;
    let category = state
        .db
        .catalog()
        .create_category(admin.id, &new.name, new.image.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn category_image(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let bytes = state
        .db
        .catalog()
        .category_image(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Category image", id))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

#[derive(Deserialize)]
struct NamedInput {
    name: String,
    email: Option<String>,
}

async fn list_product_types(State(state): State<AppState>) -> ApiResult<Json<Vec<ProductType>>> {
    Ok(Json(state.db.catalog().product_types().await?))
}

async fn create_product_type(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NamedInput>,
) -> ApiResult<(StatusCode, Json<ProductType>)> {
    let admin = user.admin()?;
    validate_name("name", &new.name).map_err(invalid)?;
    let created = state.db.catalog().create_product_type(admin.id, &new.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_suppliers(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<Supplier>>> {
    user.require(&[Role::Admin, Role::Manager, Role::Pharmacist])?;
    Ok(Json(state.db.catalog().suppliers().await?))
}

async fn create_supplier(
    State(state): State<AppState>,
    user: AuthUser,
    Json(new): Json<NamedInput>,
) -> ApiResult<(StatusCode, Json<Supplier>)> {
    let admin = user.admin()?;
    validate_name("name", &new.name).map_err(invalid)?;
    let created = state
        .db
        .catalog()
        .create_supplier(admin.id, &new.name, new.email.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_cities(State(state): State<AppState>) -> ApiResult<Json<Vec<City>>> {
    Ok(Json(state.db.catalog().cities().await?))
}

async fn list_branches(State(state): State<AppState>) -> ApiResult<Json<Vec<Branch>>> {
    Ok(Json(state.db.catalog().branches().await?))
}
