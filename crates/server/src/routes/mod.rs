//! HTTP route handlers for the POS API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness check
//! GET  /health/ready                    - Readiness check (database ping)
//!
//! # Products
//! POST /api/products                    - Create product (opening stock via ledger)
//! GET  /api/products                    - List products (search?, limit, offset)
//! GET  /api/products/reorder            - Products at or below their reorder threshold
//! GET  /api/products/{id}               - Fetch product
//! POST /api/products/{id}/stock         - Manual stock adjustment
//! GET  /api/products/{id}/movements     - Movement log, newest first (limit, offset)
//!
//! # Customers
//! POST /api/customers                   - Create customer
//! GET  /api/customers/{id}              - Fetch customer (loyalty/credit state)
//!
//! # Sales
//! POST /api/sales                       - Checkout
//! GET  /api/sales                       - Recent sales (limit, offset)
//! GET  /api/sales/{id}                  - Fetch sale with items
//! POST /api/sales/{id}/void             - Void a completed sale
//! POST /api/sales/{id}/refund           - Refund sale items
//!
//! # Orders
//! POST /api/orders                      - Create order
//! GET  /api/orders                      - List orders (status?, limit, offset)
//! GET  /api/orders/{id}                 - Fetch order with items/history/payments
//! POST /api/orders/{id}/status          - Transition order status
//! POST /api/orders/{id}/payments        - Record a payment
//!
//! # M-Pesa
//! POST /api/payments/mpesa/initiate     - Send an STK push
//! GET  /api/payments/mpesa/{checkout_request_id} - Poll transaction status
//! POST /api/payments/mpesa/callback     - Gateway webhook (always 200)
//! ```
//!
//! Mutating routes (except the gateway callback) require the
//! `X-Staff-Id` header via the [`crate::middleware::Actor`] extractor.

pub mod customers;
pub mod orders;
pub mod payments;
pub mod products;
pub mod sales;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};

use crate::state::AppState;

/// Default page size for list endpoints.
const DEFAULT_PAGE_SIZE: i64 = 50;
/// Largest page a client may request.
const MAX_PAGE_SIZE: i64 = 200;

/// Create all routes for the API.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api/products", products::router())
        .nest("/api/customers", customers::router())
        .nest("/api/sales", sales::router())
        .nest("/api/orders", orders::router())
        .nest("/api/payments/mpesa", payments::router())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Clamp client-supplied pagination to sane bounds.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).max(0),
    )
}

#[cfg(test)]
mod tests {
    use super::page;

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(page(None, None), (50, 0));
        assert_eq!(page(Some(10), Some(30)), (10, 30));
        assert_eq!(page(Some(0), Some(-5)), (1, 0));
        assert_eq!(page(Some(10_000), None), (200, 0));
    }
}
