//! Product catalog and inventory handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use duka_core::ProductId;

use crate::db::movements::MovementRepository;
use crate::db::products::ProductRepository;
use crate::error::AppError;
use crate::middleware::Actor;
use crate::models::movement::{StockAdjustmentInput, StockMovement};
use crate::models::product::{CreateProductInput, Product};
use crate::services::catalog::CatalogService;
use crate::state::AppState;

/// Build the product router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/reorder", get(reorder))
        .route("/{id}", get(show))
        .route("/{id}/stock", post(adjust_stock))
        .route("/{id}/movements", get(movements))
}

/// Query parameters for the product list.
#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    /// Matches against name and SKU.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for the movement log.
#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Create a product.
///
/// # Errors
///
/// Returns 400 for invalid input, 409 for a duplicate SKU.
pub async fn create(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let product = CatalogService::create_product(state.pool(), staff, &input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// List products, optionally filtered by a search term.
///
/// # Errors
///
/// Returns 500 on database failure.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> Result<Json<Vec<Product>>, AppError> {
    let (limit, offset) = super::page(query.limit, query.offset);
    let products = ProductRepository::new(state.pool())
        .list(query.search.as_deref(), limit, offset)
        .await?;
    Ok(Json(products))
}

/// Fetch one product.
///
/// # Errors
///
/// Returns 404 when the product does not exist.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<Json<Product>, AppError> {
    let product = ProductRepository::new(state.pool())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))?;
    Ok(Json(product))
}

/// List tracked, active products at or below their reorder threshold.
///
/// # Errors
///
/// Returns 500 on database failure.
pub async fn reorder(State(state): State<AppState>) -> Result<Json<Vec<Product>>, AppError> {
    let products = ProductRepository::new(state.pool()).needs_reorder().await?;
    Ok(Json(products))
}

/// Apply a manual stock adjustment.
///
/// # Errors
///
/// Returns 400 for invalid input or untracked products, 404 for unknown
/// products, 409 when a decrease would overdraw stock.
pub async fn adjust_stock(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    Json(input): Json<StockAdjustmentInput>,
) -> Result<Json<StockMovement>, AppError> {
    let movement =
        CatalogService::adjust_stock(state.pool(), staff, id, &input, Utc::now()).await?;
    Ok(Json(movement))
}

/// Page through a product's movement log, newest first.
///
/// # Errors
///
/// Returns 404 when the product does not exist.
pub async fn movements(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    Query(query): Query<MovementsQuery>,
) -> Result<Json<Vec<StockMovement>>, AppError> {
    // A missing product and an empty log look alike; tell them apart.
    ProductRepository::new(state.pool())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))?;

    let (limit, offset) = super::page(query.limit, query.offset);
    let log = MovementRepository::new(state.pool())
        .list_for_product(id, limit, offset)
        .await?;
    Ok(Json(log))
}
