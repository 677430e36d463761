//! Business services composing repositories under transactions.
//!
//! Services own the write paths: each multi-step operation opens one
//! transaction, calls the connection-taking repository functions, and
//! commits or rolls back as a unit. Read paths go straight to the
//! repositories.

pub mod catalog;
pub mod checkout;
pub mod daraja;
pub mod inventory;
pub mod limiter;
pub mod orders;
pub mod reconciliation;
pub mod sequence;
