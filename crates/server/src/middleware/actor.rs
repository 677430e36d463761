//! Staff attribution for mutating requests.
//!
//! The POS terminals run inside the shop LAN behind the network's access
//! control; the API itself does not authenticate. Every mutating request
//! still carries `X-Staff-Id` so sales, movements, and status changes
//! record who performed them.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use duka_core::StaffId;

use crate::error::AppError;

/// Header naming the staff member performing the request.
pub const STAFF_ID_HEADER: &str = "x-staff-id";

/// Extractor for the acting staff member.
///
/// # Example
///
/// ```rust,ignore
/// async fn create_sale(
///     Actor(staff): Actor,
///     State(state): State<AppState>,
///     Json(input): Json<CreateSaleInput>,
/// ) -> Result<Json<SaleWithItems>, AppError> { ... }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub StaffId);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(STAFF_ID_HEADER)
            .ok_or_else(|| AppError::Validation("missing X-Staff-Id header".to_owned()))?
            .to_str()
            .map_err(|_| AppError::Validation("X-Staff-Id is not valid ASCII".to_owned()))?;

        let id: i64 = raw.trim().parse().map_err(|_| {
            AppError::Validation(format!("X-Staff-Id must be a positive integer, got '{raw}'"))
        })?;
        if id <= 0 {
            return Err(AppError::Validation(format!(
                "X-Staff-Id must be a positive integer, got '{raw}'"
            )));
        }

        Ok(Self(StaffId::new(id)))
    }
}
