//! Order status state machine.
//!
//! ```text
//! pending          -> confirmed, cancelled
//! confirmed        -> processing, cancelled
//! processing       -> ready, cancelled
//! ready            -> out_for_delivery, delivered, cancelled
//! out_for_delivery -> delivered, failed
//! failed           -> out_for_delivery, cancelled
//! delivered        -> (terminal)
//! cancelled        -> (terminal)
//! ```
//!
//! The only cycle is a failed delivery going back out
//! (`out_for_delivery -> failed -> out_for_delivery`). Stock is touched
//! exclusively on the transition *into* `delivered`.

use crate::types::status::OrderStatus;

impl OrderStatus {
    /// The transitions permitted from this status.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Confirmed, Self::Cancelled],
            Self::Confirmed => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::OutForDelivery, Self::Delivered, Self::Cancelled],
            Self::OutForDelivery => &[Self::Delivered, Self::Failed],
            Self::Failed => &[Self::OutForDelivery, Self::Cancelled],
            Self::Delivered | Self::Cancelled => &[],
        }
    }

    /// Whether `next` is a legal transition from this status.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Whether this status permits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}
