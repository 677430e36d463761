//! Database operations for the `SQLite` store.
//!
//! ## Tables
//!
//! - `products` / `stock_movements` - catalog and the append-only stock ledger
//! - `customers` - loyalty and store-credit state
//! - `sales` / `sale_items` - point-of-sale transactions
//! - `orders` / `order_items` / `order_status_history` / `order_payments`
//! - `mpesa_transactions` - STK push reconciliation records
//! - `counters` - atomic document sequences
//!
//! All queries go through the runtime query API with `?` placeholders;
//! multi-step writes take `&mut SqliteConnection` so services can compose
//! them under a single transaction.
//!
//! # Migrations
//!
//! Migrations are embedded from `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p duka-cli -- migrate
//! ```

pub mod counters;
pub mod customers;
pub mod movements;
pub mod mpesa;
pub mod orders;
pub mod products;
pub mod sales;

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;

pub use counters::CounterRepository;
pub use customers::CustomerRepository;
pub use movements::MovementRepository;
pub use mpesa::MpesaRepository;
pub use orders::OrderRepository;
pub use products::ProductRepository;
pub use sales::SaleRepository;

/// Embedded migrations from `crates/server/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique SKU or phone).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `SQLite` connection pool with sensible defaults.
///
/// File databases get WAL journaling and a busy timeout. In-memory
/// databases are capped at a single connection: every pooled connection
/// would otherwise open its own empty database.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<SqlitePool, sqlx::Error> {
    let url = database_url.expose_secret();
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let max_connections = if in_memory {
        1
    } else {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        5
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
}

/// Parse a TEXT decimal column, reporting the column on failure.
pub(crate) fn parse_decimal(raw: &str, column: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str_exact(raw)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid decimal in {column}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    use super::{MIGRATOR, create_pool};
    use secrecy::SecretString;
    use sqlx::SqlitePool;

    /// A migrated single-connection in-memory database.
    pub async fn memory_pool() -> SqlitePool {
        let pool = create_pool(&SecretString::from("sqlite::memory:"))
            .await
            .unwrap();
        MIGRATOR.run(&pool).await.unwrap();
        pool
    }
}
