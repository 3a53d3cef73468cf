use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;

/// Create a new database connection pool
///
/// The caller owns the pool; sqlx pools are internally reference-counted, so
/// clones share the same connections.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let database_url = config.database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.database.max_lifetime_secs))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Run database migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;

    Ok(())
}
