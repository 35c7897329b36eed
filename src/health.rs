//! Health check module
//! Reports reachability of the database, the cache and the price oracle

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::cache::Cache;
use crate::services::PriceOracle;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// An upstream we only read prices from is down; orders can still be served
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    cache: Arc<dyn Cache>,
    oracle: Arc<dyn PriceOracle>,
    check_timeout: Duration,
}

impl HealthChecker {
    pub fn new(cache: Arc<dyn Cache>, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            #[cfg(feature = "database")]
            db_pool: None,
            cache,
            oracle,
            check_timeout: Duration::from_secs(5),
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: Option<sqlx::PgPool>) -> Self {
        self.db_pool = pool;
        self
    }

    pub fn with_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut core_healthy = true;

        if let Some(db) = self.check_database().await {
            core_healthy &= db.status == ComponentState::Up;
            health_status.checks.insert("database".to_string(), db);
        }

        let cache = self.probe("cache", self.cache.ping()).await;
        core_healthy &= cache.status == ComponentState::Up;
        health_status.checks.insert("cache".to_string(), cache);

        let oracle = self.probe("price_oracle", self.oracle.ping()).await;
        let oracle_up = oracle.status == ComponentState::Up;
        health_status.checks.insert("price_oracle".to_string(), oracle);

        health_status.status = match (core_healthy, oracle_up) {
            (false, _) => HealthState::Unhealthy,
            (true, false) => HealthState::Degraded,
            (true, true) => HealthState::Healthy,
        };

        health_status
    }

    #[cfg(feature = "database")]
    async fn check_database(&self) -> Option<ComponentHealth> {
        match &self.db_pool {
            Some(pool) => Some(
                self.probe("database", crate::database::health_check(pool))
                    .await,
            ),
            None => None,
        }
    }

    #[cfg(not(feature = "database"))]
    async fn check_database(&self) -> Option<ComponentHealth> {
        None
    }

    async fn probe<F, E>(&self, component: &str, check: F) -> ComponentHealth
    where
        F: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        match timeout(self.check_timeout, check).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                info!(component, response_time_ms = elapsed as u64, "health check ok");
                ComponentHealth::up(Some(elapsed))
            }
            Ok(Err(e)) => {
                error!(component, error = %e, "health check failed");
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!(component, "health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }
}

/// `/health`, `/health/ready` and `/health/live`
pub fn router(checker: HealthChecker) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(Arc::new(checker))
}

async fn health(
    State(checker): State<Arc<HealthChecker>>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: State<Arc<HealthChecker>>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    health(state).await
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, CacheResult, MemoryCache};
    use crate::currency::Currency;
    use crate::services::{OracleError, OracleResult};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use bigdecimal::BigDecimal;
    use tower::ServiceExt;

    struct StubOracle {
        up: bool,
    }

    #[async_trait]
    impl PriceOracle for StubOracle {
        async fn get_token_info(&self, _currency: &Currency) -> OracleResult<Option<Currency>> {
            Ok(None)
        }

        async fn get_prices(&self, _currencies: &[Currency]) -> OracleResult<HashMap<String, BigDecimal>> {
            Ok(HashMap::new())
        }

        async fn ping(&self) -> OracleResult<()> {
            if self.up {
                Ok(())
            } else {
                Err(OracleError::RateLimited)
            }
        }
    }

    struct DownCache;

    #[async_trait]
    impl Cache for DownCache {
        async fn get_raw(&self, _key: &str) -> CacheResult<Option<String>> {
            Ok(None)
        }

        async fn set_raw(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<()> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }

        async fn ping(&self) -> CacheResult<()> {
            Err(CacheError::ConnectionError("refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(health_status.is_healthy());
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_oracle_down_degrades() {
        let checker = HealthChecker::new(Arc::new(MemoryCache::new()), Arc::new(StubOracle { up: false }));
        let status = checker.check_health().await;

        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["cache"].status, ComponentState::Up);
        assert_eq!(status.checks["price_oracle"].status, ComponentState::Down);
    }

    #[tokio::test]
    async fn test_cache_down_is_unhealthy() {
        let checker = HealthChecker::new(Arc::new(DownCache), Arc::new(StubOracle { up: true }));
        let response = router(checker)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_liveness_ignores_dependencies() {
        let checker = HealthChecker::new(Arc::new(DownCache), Arc::new(StubOracle { up: false }));
        let response = router(checker)
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
