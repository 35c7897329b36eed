//! Application configuration module
//! Loads settings from the environment (and `.env`) and validates them

use std::env;
use std::time::Duration;

use crate::services::{ChangeNowConfig, CoinGeckoConfig};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS`
    pub database: Option<DatabaseConfig>,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub chains: ChainRpcConfig,
    pub oracle: PriceOracleConfig,
    pub exchange: ExchangeConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Endpoints and limits for the chain adapters
#[derive(Debug, Clone)]
pub struct ChainRpcConfig {
    pub alchemy_api_key: Option<String>,
    pub solana_rpc_url: String,
    pub sui_rpc_url: String,
    pub btc_api_url: String,
    pub btc_tx_api_url: String,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct PriceOracleConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
    pub token_info_ttl: u64, // seconds
    pub price_ttl: u64,      // seconds
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
    pub currency_cache_ttl: u64, // seconds
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = env::var("SKIP_EXTERNALS")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: if skip_externals {
                None
            } else {
                Some(DatabaseConfig::from_env()?)
            },
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            chains: ChainRpcConfig::from_env()?,
            oracle: PriceOracleConfig::from_env()?,
            exchange: ExchangeConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if !self.skip_externals {
            self.cache.validate()?;
        }
        self.logging.validate()?;
        self.chains.validate()?;
        self.oracle.validate()?;
        self.exchange.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parsed("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parsed("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parsed("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_ttl: parsed("CACHE_DEFAULT_TTL", "3600")?,
            max_connections: parsed("CACHE_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl ChainRpcConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ChainRpcConfig {
            alchemy_api_key: optional("ALCHEMY_API_KEY"),
            solana_rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            sui_rpc_url: env::var("SUI_RPC_URL")
                .unwrap_or_else(|_| "https://fullnode.mainnet.sui.io:443".to_string()),
            btc_api_url: env::var("BTC_API_URL")
                .unwrap_or_else(|_| "https://api.haskoin.com/btc".to_string()),
            btc_tx_api_url: env::var("BTC_TX_API_URL")
                .unwrap_or_else(|_| "https://blockchain.info".to_string()),
            request_timeout: parsed("CHAIN_REQUEST_TIMEOUT", "15")?,
            max_retries: parsed("CHAIN_MAX_RETRIES", "3")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("SOLANA_RPC_URL", &self.solana_rpc_url),
            ("SUI_RPC_URL", &self.sui_rpc_url),
            ("BTC_API_URL", &self.btc_api_url),
            ("BTC_TX_API_URL", &self.btc_tx_api_url),
        ] {
            validate_url(name, url)?;
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue("CHAIN_REQUEST_TIMEOUT".to_string()));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl PriceOracleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PriceOracleConfig {
            api_key: optional("COINGECKO_API_KEY"),
            base_url: env::var("COINGECKO_BASE_URL")
                .unwrap_or_else(|_| "https://pro-api.coingecko.com/api/v3".to_string()),
            request_timeout: parsed("COINGECKO_TIMEOUT", "10")?,
            max_retries: parsed("COINGECKO_MAX_RETRIES", "3")?,
            token_info_ttl: parsed("TOKEN_INFO_CACHE_TTL", "86400")?,
            price_ttl: parsed("PRICE_CACHE_TTL", "300")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("COINGECKO_BASE_URL", &self.base_url)?;
        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue("COINGECKO_TIMEOUT".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn client_config(&self) -> CoinGeckoConfig {
        CoinGeckoConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone(),
            token_info_ttl: Duration::from_secs(self.token_info_ttl),
            price_ttl: Duration::from_secs(self.price_ttl),
        }
    }
}

impl ExchangeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ExchangeConfig {
            api_key: optional("CHANGENOW_API_KEY"),
            base_url: env::var("CHANGENOW_BASE_URL")
                .unwrap_or_else(|_| "https://api.changenow.io/v2".to_string()),
            request_timeout: parsed("CHANGENOW_TIMEOUT", "15")?,
            max_retries: parsed("CHANGENOW_MAX_RETRIES", "3")?,
            currency_cache_ttl: env::var("CHANGENOW_CURRENCY_CACHE_TTL")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("CHANGENOW_CURRENCY_CACHE_TTL".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("CHANGENOW_BASE_URL", &self.base_url)?;
        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue("CHANGENOW_TIMEOUT".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn client_config(&self) -> ChangeNowConfig {
        ChangeNowConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone(),
            currency_cache_ttl: Duration::from_secs(self.currency_cache_ttl),
        }
    }
}

/// Unset and blank are both "not configured"
/// `name` parsed as `T`, or `default` when unset
fn parsed<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_url(name: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be a valid URL",
            name
        )));
    }
    Ok(())
}

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

impl From<std::num::ParseFloatError> for ConfigError {
    fn from(_: std::num::ParseFloatError) -> Self {
        ConfigError::InvalidValue("Failed to parse float value".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_connections_above_max() {
        let config = DatabaseConfig {
            url: "postgres://localhost/crosspay".to_string(),
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url_scheme() {
        let config = CacheConfig {
            redis_url: "http://localhost:6379".to_string(),
            default_ttl: 60,
            max_connections: 4,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            format: LogFormat::Plain,
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()))
        );
    }

    #[test]
    fn test_oracle_client_config_conversion() {
        let config = PriceOracleConfig {
            api_key: Some("cg-key".to_string()),
            base_url: "https://pro-api.coingecko.com/api/v3/".to_string(),
            request_timeout: 10,
            max_retries: 3,
            token_info_ttl: 86400,
            price_ttl: 300,
        };

        let client = config.client_config();
        assert_eq!(client.base_url, "https://pro-api.coingecko.com/api/v3");
        assert_eq!(client.price_ttl, Duration::from_secs(300));
        assert_eq!(client.api_key.as_deref(), Some("cg-key"));
    }

    #[test]
    fn test_exchange_url_must_be_http() {
        let config = ExchangeConfig {
            api_key: None,
            base_url: "ftp://changenow".to_string(),
            request_timeout: 15,
            max_retries: 3,
            currency_cache_ttl: 86400,
        };

        assert!(config.validate().is_err());
    }
}
