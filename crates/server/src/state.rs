//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::services::daraja::{DarajaClient, DarajaError};
use crate::services::limiter::{AttemptLimiter, InMemoryAttemptLimiter};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like the database pool, the Daraja client, and the
/// STK push attempt limiter.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pool: SqlitePool,
    daraja: DarajaClient,
    limiter: Arc<dyn AttemptLimiter>,
}

impl AppState {
    /// Create a new application state with the in-process attempt
    /// limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the Daraja HTTP client fails to build.
    pub fn new(config: ServerConfig, pool: SqlitePool) -> Result<Self, DarajaError> {
        Self::with_limiter(config, pool, Arc::new(InMemoryAttemptLimiter::new()))
    }

    /// Create a new application state with a caller-supplied limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if the Daraja HTTP client fails to build.
    pub fn with_limiter(
        config: ServerConfig,
        pool: SqlitePool,
        limiter: Arc<dyn AttemptLimiter>,
    ) -> Result<Self, DarajaError> {
        let daraja = DarajaClient::new(config.mpesa.clone())?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                daraja,
                limiter,
            }),
        })
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Get a reference to the Daraja API client.
    #[must_use]
    pub fn daraja(&self) -> &DarajaClient {
        &self.inner.daraja
    }

    /// Get a reference to the STK push attempt limiter.
    #[must_use]
    pub fn limiter(&self) -> &dyn AttemptLimiter {
        self.inner.limiter.as_ref()
    }
}
