//! Customer registration and lookup handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use duka_core::CustomerId;

use crate::db::customers::CustomerRepository;
use crate::error::AppError;
use crate::middleware::Actor;
use crate::models::customer::{CreateCustomerInput, Customer};
use crate::services::catalog::CatalogService;
use crate::state::AppState;

/// Build the customer router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", get(show))
}

/// Register a customer.
///
/// # Errors
///
/// Returns 400 for invalid input, 409 for an already-registered phone.
pub async fn create(
    Actor(_): Actor,
    State(state): State<AppState>,
    Json(input): Json<CreateCustomerInput>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    let customer = CatalogService::create_customer(state.pool(), &input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// Fetch one customer with loyalty and credit state.
///
/// # Errors
///
/// Returns 404 when the customer does not exist.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<CustomerId>,
) -> Result<Json<Customer>, AppError> {
    let customer = CustomerRepository::new(state.pool())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("customer {id} not found")))?;
    Ok(Json(customer))
}
