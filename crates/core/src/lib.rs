//! Duka Core - Shared domain library.
//!
//! This crate provides the domain types and pure business rules used across
//! all Duka components:
//! - `server` - REST backend (inventory, sales, orders, M-Pesa payments)
//! - `cli` - Command-line tools for migrations, seeding, and maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! database access, no HTTP clients. Sale totals, refund proportions,
//! loyalty tiers, order status transitions, receipt numbering, and M-Pesa
//! wire handling all live here so they can be tested without a database.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money, phone numbers, and statuses
//! - [`sale`] - Line item and sale total arithmetic, proportional refunds
//! - [`order`] - Order status state machine
//! - [`loyalty`] - Customer tier thresholds and points
//! - [`sequence`] - Counter reset periods and receipt/order number formats
//! - [`mpesa`] - STK push credentials, result code mapping, callback parsing

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod loyalty;
pub mod mpesa;
pub mod order;
pub mod sale;
pub mod sequence;
pub mod types;

pub use types::*;
