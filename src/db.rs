//! Database connection.
//!
//! [`connect`] is the single place a pool is created. Both the resolver's
//! store fallback and the chunk store draw connections from it; pooled
//! connections return on drop, and the caller closes the pool when the run
//! ends.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.db.url)
        .await
        .context("Failed to connect to the database")?;

    Ok(pool)
}
