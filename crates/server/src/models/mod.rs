//! Domain models and request inputs.

pub mod customer;
pub mod movement;
pub mod mpesa;
pub mod order;
pub mod product;
pub mod sale;
