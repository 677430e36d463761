//! Stock movement ledger maintenance.
//!
//! The movement ledger is append-only and grows with every sale, so a
//! busy shop trims it periodically. Pruning keeps the newest N entries
//! per product and vacuums the database to reclaim the space.

use secrecy::SecretString;
use tracing::info;

use duka_server::db::{self, MovementRepository};

/// Delete all but the newest `keep` movements per product.
///
/// # Errors
///
/// Returns an error if `keep` is below 1, `DATABASE_URL` is unset, or
/// the database operations fail.
pub async fn run(keep: i64) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    if keep < 1 {
        return Err("--keep must be at least 1".into());
    }

    let database_url = std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| "DATABASE_URL not set")?;

    let pool = db::create_pool(&database_url).await?;

    info!(keep, "Pruning stock movements...");
    let removed = MovementRepository::new(&pool).prune(keep).await?;

    // Return the space the deleted rows held
    sqlx::query("VACUUM").execute(&pool).await?;

    info!("Removed {removed} stock movements");
    Ok(())
}
