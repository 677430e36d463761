//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! duka migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `SQLite` connection string (e.g., `sqlite://duka.db`)
//!
//! Migrations are embedded from `crates/server/migrations/` at compile
//! time, so the binary carries everything it needs.

use secrecy::SecretString;
use tracing::info;

use duka_server::db;

/// Run the embedded migrations against `DATABASE_URL`.
///
/// # Errors
///
/// Returns an error if `DATABASE_URL` is unset, the database cannot be
/// opened, or a migration fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| "DATABASE_URL not set")?;

    info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;

    info!("Running migrations...");
    db::MIGRATOR.run(&pool).await?;

    info!("Migrations complete!");
    Ok(())
}
