use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crosspay_backend::cache::{Cache, MemoryCache};
use crosspay_backend::chains::evm::EvmAdapter;
use crosspay_backend::chains::rpc::JsonRpcClient;
use crosspay_backend::chains::solana::SolanaAdapter;
use crosspay_backend::chains::sui::SuiAdapter;
use crosspay_backend::chains::utxo::UtxoAdapter;
use crosspay_backend::chains::{ChainAdapter, ChainAggregator};
use crosspay_backend::config::{AppConfig, ChainRpcConfig};
use crosspay_backend::currency::{all_chains, ChainType};
use crosspay_backend::database::{
    InMemoryOrganizationStore, InMemoryPayOrderStore, OrganizationStore, PayOrderStore,
};
use crosspay_backend::health::{self, HealthChecker};
use crosspay_backend::logging::init_tracing;
use crosspay_backend::middleware::UuidRequestId;
use crosspay_backend::services::{
    ApiHttpClient, BridgeExchange, ChangeNowClient, CoinGeckoClient, PayOrderService,
    PayOrderServiceConfig, PriceOracle, QuoteEngine,
};
use crosspay_backend::workers::{ConfirmationSweeper, ConfirmationSweeperConfig};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// One adapter per registered chain we have an endpoint for
fn build_chain_adapters(config: &ChainRpcConfig) -> anyhow::Result<Vec<Arc<dyn ChainAdapter>>> {
    let http = ApiHttpClient::new("chain-rpc", config.timeout(), config.max_retries)?;
    let mut adapters: Vec<Arc<dyn ChainAdapter>> = Vec::new();

    for chain in all_chains() {
        match chain.chain_type {
            ChainType::Evm => match config.alchemy_api_key.as_deref() {
                Some(key) => match EvmAdapter::alchemy(chain, key, http.clone()) {
                    Ok(adapter) => adapters.push(Arc::new(adapter)),
                    Err(e) => warn!(chain = chain.name, error = %e, "no EVM endpoint for chain"),
                },
                None => warn!(chain = chain.name, "ALCHEMY_API_KEY not set, skipping EVM chain"),
            },
            ChainType::Sol => adapters.push(Arc::new(SolanaAdapter::new(
                chain,
                JsonRpcClient::new(http.clone(), config.solana_rpc_url.clone()),
            ))),
            ChainType::Sui => adapters.push(Arc::new(SuiAdapter::new(
                chain,
                JsonRpcClient::new(http.clone(), config.sui_rpc_url.clone()),
            ))),
            ChainType::Utxo => adapters.push(Arc::new(UtxoAdapter::new(
                chain,
                http.clone(),
                config.btc_api_url.clone(),
                config.btc_tx_api_url.clone(),
            ))),
            ChainType::Tron => warn!(chain = chain.name, "no adapter for chain type, skipping"),
        }
    }

    Ok(adapters)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "🚀 Starting crosspay backend service"
    );

    // Cache
    let cache: Arc<dyn Cache> = if config.skip_externals {
        info!("⏭️  Using in-memory cache (SKIP_EXTERNALS=true)");
        Arc::new(MemoryCache::new())
    } else {
        redis_or_memory_cache(&config).await
    };

    // Persistence
    let (orders, organizations, db_pool) = init_stores(&config).await?;

    // Upstreams
    let oracle_http = ApiHttpClient::new("coingecko", config.oracle.timeout(), config.oracle.max_retries)?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(CoinGeckoClient::new(
        oracle_http,
        cache.clone(),
        config.oracle.client_config(),
    ));
    let exchange_http =
        ApiHttpClient::new("changenow", config.exchange.timeout(), config.exchange.max_retries)?;
    let exchange: Arc<dyn BridgeExchange> = Arc::new(ChangeNowClient::new(
        exchange_http,
        cache.clone(),
        config.exchange.client_config(),
    ));

    let adapters = build_chain_adapters(&config.chains)?;
    info!(adapters = adapters.len(), "⛓️  Chain adapters ready");
    let chains = Arc::new(ChainAggregator::new(adapters));

    let service_config = PayOrderServiceConfig::from_env();
    let quotes = Arc::new(
        QuoteEngine::new(oracle.clone(), exchange).with_concurrency(service_config.quote_concurrency),
    );
    let payorders = Arc::new(PayOrderService::new(
        orders.clone(),
        organizations,
        chains,
        quotes,
        service_config,
    ));
    info!("✅ Pay order service initialized");

    // Workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_config = ConfirmationSweeperConfig::from_env();
    let sweeper_handle = if sweeper_config.enabled {
        let sweeper = ConfirmationSweeper::new(payorders.clone(), orders, sweeper_config);
        Some(tokio::spawn(sweeper.run(worker_shutdown_rx)))
    } else {
        info!("Confirmation sweeper disabled (SWEEPER_ENABLED=false)");
        None
    };

    // HTTP
    let checker = HealthChecker::new(cache, oracle);
    #[cfg(feature = "database")]
    let checker = checker.with_database(db_pool);
    #[cfg(not(feature = "database"))]
    let _ = db_pool;

    let app = Router::new().merge(health::router(checker)).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for confirmation sweeper shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

#[cfg(feature = "cache")]
async fn redis_or_memory_cache(config: &AppConfig) -> Arc<dyn Cache> {
    use crosspay_backend::cache::{init_cache_pool, CacheConfig, RedisCache};

    info!("🔄 Initializing Redis cache connection pool...");
    let pool_config = CacheConfig {
        redis_url: config.cache.redis_url.clone(),
        max_connections: config.cache.max_connections,
        ..Default::default()
    };
    match init_cache_pool(pool_config).await {
        Ok(pool) => {
            info!("✅ Cache connection pool initialized");
            Arc::new(RedisCache::new(
                pool,
                Duration::from_secs(config.cache.default_ttl),
            ))
        }
        Err(e) => {
            warn!(error = %e, "⚠️  Redis unavailable, falling back to in-memory cache");
            Arc::new(MemoryCache::new())
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn redis_or_memory_cache(_config: &AppConfig) -> Arc<dyn Cache> {
    Arc::new(MemoryCache::new())
}

#[cfg(feature = "database")]
type DbPool = Option<sqlx::PgPool>;
#[cfg(not(feature = "database"))]
type DbPool = Option<()>;

#[cfg(feature = "database")]
async fn init_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn PayOrderStore>, Arc<dyn OrganizationStore>, DbPool)> {
    use crosspay_backend::database::{
        init_pool_from_config, PgOrganizationRepository, PgPayOrderRepository,
    };

    let db = match &config.database {
        Some(db) => db,
        None => return Ok(in_memory_stores()),
    };

    info!("📊 Initializing database connection pool...");
    let pool = init_pool_from_config(db).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    Ok((
        Arc::new(PgPayOrderRepository::new(pool.clone())),
        Arc::new(PgOrganizationRepository::new(pool.clone())),
        Some(pool),
    ))
}

#[cfg(not(feature = "database"))]
async fn init_stores(
    _config: &AppConfig,
) -> anyhow::Result<(Arc<dyn PayOrderStore>, Arc<dyn OrganizationStore>, DbPool)> {
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (Arc<dyn PayOrderStore>, Arc<dyn OrganizationStore>, DbPool) {
    info!("⏭️  Using in-memory stores");
    (
        Arc::new(InMemoryPayOrderStore::new()),
        Arc::new(InMemoryOrganizationStore::new()),
        None,
    )
}
