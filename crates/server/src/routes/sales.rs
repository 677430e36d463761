//! Point-of-sale checkout handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use duka_core::SaleId;

use crate::db::sales::SaleRepository;
use crate::error::AppError;
use crate::middleware::Actor;
use crate::models::sale::{CreateSaleInput, RefundSaleInput, Sale, SaleWithItems, VoidSaleInput};
use crate::services::checkout::SaleService;
use crate::state::AppState;

/// Build the sales router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/{id}", get(show))
        .route("/{id}/void", post(void))
        .route("/{id}/refund", post(refund))
}

/// Query parameters for the recent-sales list.
#[derive(Debug, Deserialize)]
pub struct ListSalesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Ring up a sale.
///
/// # Errors
///
/// Returns 400 for invalid input, 404 for unknown products/customers,
/// 409 for insufficient stock, credit, or an unusable M-Pesa
/// transaction.
pub async fn create(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Json(input): Json<CreateSaleInput>,
) -> Result<(StatusCode, Json<SaleWithItems>), AppError> {
    let sale = SaleService::create(state.pool(), staff, &input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(sale)))
}

/// List recent sales, newest first.
///
/// # Errors
///
/// Returns 500 on database failure.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListSalesQuery>,
) -> Result<Json<Vec<Sale>>, AppError> {
    let (limit, offset) = super::page(query.limit, query.offset);
    let sales = SaleRepository::new(state.pool())
        .list_recent(limit, offset)
        .await?;
    Ok(Json(sales))
}

/// Fetch one sale with its items.
///
/// # Errors
///
/// Returns 404 when the sale does not exist.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<SaleId>,
) -> Result<Json<SaleWithItems>, AppError> {
    let sale = SaleRepository::new(state.pool())
        .get_with_items(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("sale {id} not found")))?;
    Ok(Json(sale))
}

/// Void a completed sale, restoring its stock.
///
/// # Errors
///
/// Returns 400 for a missing reason, 404 for an unknown sale, 409 when
/// the sale is not voidable.
pub async fn void(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Path(id): Path<SaleId>,
    Json(input): Json<VoidSaleInput>,
) -> Result<Json<SaleWithItems>, AppError> {
    let sale = SaleService::void(state.pool(), staff, id, &input, Utc::now()).await?;
    Ok(Json(sale))
}

/// Refund part or all of a sale.
///
/// # Errors
///
/// Returns 400 for invalid input, 404 when the sale or a product line is
/// unknown, 409 when the requested quantity exceeds what remains.
pub async fn refund(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Path(id): Path<SaleId>,
    Json(input): Json<RefundSaleInput>,
) -> Result<Json<SaleWithItems>, AppError> {
    let sale = SaleService::refund(state.pool(), staff, id, &input, Utc::now()).await?;
    Ok(Json(sale))
}
