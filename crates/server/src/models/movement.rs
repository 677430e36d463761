//! Stock movement ledger models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use duka_core::{MovementId, MovementType, ProductId, StaffId};

/// One entry in the append-only stock movement ledger.
///
/// `previous_stock`/`new_stock` snapshot the stock level around the
/// movement, so the ledger replays to the current level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    /// Unique movement ID.
    pub id: MovementId,
    /// Product the movement applies to.
    pub product_id: ProductId,
    /// Movement classification; decides direction.
    pub movement_type: MovementType,
    /// Units moved, always positive.
    pub quantity: i64,
    /// Stock level before the movement.
    pub previous_stock: i64,
    /// Stock level after the movement.
    pub new_stock: i64,
    /// What caused the movement (receipt number, order number, ...).
    pub reference: String,
    /// Optional free-text reason.
    pub reason: Option<String>,
    /// Staff member who performed the action.
    pub performed_by: StaffId,
    /// When the movement was recorded.
    pub created_at: DateTime<Utc>,
}

/// Input for a manual stock adjustment.
#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustmentInput {
    /// Units to move, always positive.
    pub quantity: i64,
    /// Movement classification; decides direction.
    pub movement_type: MovementType,
    /// Optional free-text reason.
    pub reason: Option<String>,
}
