//! Customer order handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use duka_core::OrderId;
use duka_core::types::OrderStatus;

use crate::db::orders::OrderRepository;
use crate::error::AppError;
use crate::middleware::Actor;
use crate::models::order::{
    CreateOrderInput, Order, OrderWithDetails, RecordOrderPaymentInput, TransitionOrderInput,
};
use crate::services::orders::OrderService;
use crate::state::AppState;

/// Build the orders router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/{id}", get(show))
        .route("/{id}/status", post(transition))
        .route("/{id}/payments", post(record_payment))
}

/// Query parameters for the order list.
#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Take a new order. Stock is not touched until delivery.
///
/// # Errors
///
/// Returns 400 for invalid input, 404 for unknown products or customers.
pub async fn create(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Json(input): Json<CreateOrderInput>,
) -> Result<(StatusCode, Json<OrderWithDetails>), AppError> {
    let order = OrderService::create(state.pool(), staff, &input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// List orders, newest first, optionally filtered by status.
///
/// # Errors
///
/// Returns 500 on database failure.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let (limit, offset) = super::page(query.limit, query.offset);
    let orders = OrderRepository::new(state.pool())
        .list(query.status, limit, offset)
        .await?;
    Ok(Json(orders))
}

/// Fetch one order with items, payments, and status history.
///
/// # Errors
///
/// Returns 404 when the order does not exist.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderWithDetails>, AppError> {
    let order = OrderRepository::new(state.pool())
        .get_with_details(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
    Ok(Json(order))
}

/// Move an order along its lifecycle.
///
/// # Errors
///
/// Returns 404 for an unknown order, 409 for a transition the lifecycle
/// does not allow or stock the delivery cannot cover.
pub async fn transition(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(input): Json<TransitionOrderInput>,
) -> Result<Json<OrderWithDetails>, AppError> {
    let order = OrderService::transition(state.pool(), staff, id, &input, Utc::now()).await?;
    Ok(Json(order))
}

/// Record a payment against an order.
///
/// # Errors
///
/// Returns 400 for a non-positive amount, 404 for an unknown order, 409
/// for a cancelled order.
pub async fn record_payment(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(input): Json<RecordOrderPaymentInput>,
) -> Result<Json<OrderWithDetails>, AppError> {
    let order = OrderService::record_payment(state.pool(), staff, id, &input, Utc::now()).await?;
    Ok(Json(order))
}
