use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info, warn};

use super::error::DatabaseError;
use crate::config::DatabaseConfig;

/// Postgres pool sizing and timeouts
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            // the sweeper and the service share one pool; never ask for more idle than max
            min_connections: config.min_connections.min(config.max_connections),
            acquire_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: config.idle_timeout.map(Duration::from_secs),
            ..Self::default()
        }
    }
}

/// Connect and prove the pool with one acquired connection
pub async fn init_pool(database_url: &str, config: Option<PoolConfig>) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "connecting pay order database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            error!(error = %e, "database connection failed");
            DatabaseError::from_sqlx(e)
        })?;

    health_check(&pool).await?;
    Ok(pool)
}

pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    init_pool(&config.url, Some(PoolConfig::from(config))).await
}

/// Round-trip a trivial query
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| {
            warn!(error = %e, "database ping failed");
            DatabaseError::from_sqlx(e)
        })
}
