//! Price oracle client (CoinGecko Pro)
//!
//! Resolves currencies to oracle coin ids and metadata (cached for a day) and
//! fetches USD spot prices (cached for minutes, keyed by the sorted id set).

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::http_client::{ApiHttpClient, HttpError};
use super::json_decimal;
use crate::cache::keys::oracle::{PriceKey, TokenInfoKey};
use crate::cache::{Cache, CacheExt};
use crate::currency::{Currency, CurrencyMetadata, ServiceType};

pub type OracleResult<T> = Result<T, OracleError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("Price oracle rate limit exceeded")]
    RateLimited,

    #[error("Price oracle request failed: {0}")]
    Http(HttpError),

    #[error("Invalid price oracle response: {message}")]
    InvalidResponse { message: String },
}

impl From<HttpError> for OracleError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::RateLimited { .. } => OracleError::RateLimited,
            other => OracleError::Http(other),
        }
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Resolve metadata for a currency. `Ok(None)` means the oracle does not
    /// know it, which callers treat as unsupported.
    async fn get_token_info(&self, currency: &Currency) -> OracleResult<Option<Currency>>;

    /// USD spot prices keyed by currency id; unknown currencies are absent
    async fn get_prices(&self, currencies: &[Currency]) -> OracleResult<HashMap<String, BigDecimal>>;

    async fn ping(&self) -> OracleResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub token_info_ttl: Duration,
    pub price_ttl: Duration,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pro-api.coingecko.com/api/v3".to_string(),
            api_key: None,
            token_info_ttl: Duration::from_secs(24 * 60 * 60),
            price_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoinResponse {
    id: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    asset_platform_id: Option<String>,
    #[serde(default)]
    detail_platforms: HashMap<String, DetailPlatform>,
    #[serde(default)]
    image: Option<CoinImage>,
}

#[derive(Debug, Deserialize)]
struct DetailPlatform {
    #[serde(default)]
    decimal_place: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CoinImage {
    #[serde(default)]
    small: Option<String>,
}

/// Oracle record for one currency, as cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub coin_id: String,
    pub name: String,
    pub ticker: String,
    pub decimals: u32,
    pub image: Option<String>,
}

impl TokenRecord {
    fn apply(&self, currency: &Currency) -> Currency {
        let price_usd = currency.price_usd().cloned();
        currency.clone().with_metadata(CurrencyMetadata {
            name: Some(self.name.clone()),
            ticker: Some(self.ticker.to_uppercase()),
            decimals: Some(self.decimals),
            image: self.image.clone(),
            price_usd,
        })
    }
}

pub struct CoinGeckoClient {
    http: ApiHttpClient,
    cache: Arc<dyn Cache>,
    config: CoinGeckoConfig,
}

impl CoinGeckoClient {
    pub fn new(http: ApiHttpClient, cache: Arc<dyn Cache>, config: CoinGeckoConfig) -> Self {
        Self {
            http,
            cache,
            config,
        }
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        let mut headers = vec![("accept", "application/json")];
        if let Some(key) = self.config.api_key.as_deref() {
            headers.push(("x-cg-pro-api-key", key));
        }
        headers
    }

    fn coin_url(&self, currency: &Currency) -> Option<String> {
        let chain = currency.chain()?;
        let base = self.config.base_url.trim_end_matches('/');
        if currency.is_native() {
            Some(format!("{}/coins/{}", base, chain.native.coingecko_id))
        } else {
            let platform = chain.alias(ServiceType::CoinGecko)?;
            Some(format!(
                "{}/coins/{}/contract/{}",
                base,
                platform,
                currency.address()?
            ))
        }
    }

    /// Cached lookup; `None` is cached too so unknown tokens are not re-queried
    async fn token_record(&self, currency: &Currency) -> OracleResult<Option<TokenRecord>> {
        let key = TokenInfoKey::new(currency.id()).to_string();
        if let Some(cached) = self.cache.get_or_miss::<Option<TokenRecord>>(&key).await {
            return Ok(cached);
        }

        let url = match self.coin_url(currency) {
            Some(url) => url,
            None => {
                debug!(currency_id = %currency, "currency has no oracle lookup path");
                return Ok(None);
            }
        };

        let headers = self.headers();
        let record = self
            .http
            .get_json_optional::<CoinResponse>(&url, &headers)
            .await?
            .and_then(|coin| record_from_coin(currency, coin));

        self.cache
            .set_quietly(&key, &record, Some(self.config.token_info_ttl))
            .await;
        Ok(record)
    }

    async fn fetch_prices(&self, coin_ids: &[String]) -> OracleResult<HashMap<String, BigDecimal>> {
        let key = PriceKey::new(coin_ids).to_string();
        if let Some(cached) = self
            .cache
            .get_or_miss::<HashMap<String, BigDecimal>>(&key)
            .await
        {
            return Ok(cached);
        }

        let url = reqwest::Url::parse_with_params(
            &format!("{}/simple/price", self.config.base_url.trim_end_matches('/')),
            &[
                ("ids", coin_ids.join(",")),
                ("vs_currencies", "usd".to_string()),
                ("include_last_updated_at", "true".to_string()),
                ("precision", "8".to_string()),
            ],
        )
        .map_err(|e| OracleError::InvalidResponse {
            message: format!("invalid price url: {}", e),
        })?;

        let headers = self.headers();
        let body: HashMap<String, JsonValue> = self.http.get_json(url.as_str(), &headers).await?;

        let prices: HashMap<String, BigDecimal> = body
            .into_iter()
            .filter_map(|(coin_id, data)| {
                let price = data.get("usd").and_then(json_decimal)?;
                Some((coin_id, price))
            })
            .collect();

        self.cache
            .set_quietly(&key, &prices, Some(self.config.price_ttl))
            .await;
        Ok(prices)
    }
}

fn record_from_coin(currency: &Currency, coin: CoinResponse) -> Option<TokenRecord> {
    let platform_decimals = coin
        .asset_platform_id
        .as_ref()
        .and_then(|platform| coin.detail_platforms.get(platform))
        .and_then(|detail| detail.decimal_place);

    let decimals = match platform_decimals {
        Some(decimals) => decimals,
        None if currency.is_native() => currency.chain()?.native.decimals,
        None => {
            warn!(currency_id = %currency, coin_id = %coin.id, "oracle has no decimals for token");
            return None;
        }
    };

    Some(TokenRecord {
        coin_id: coin.id,
        name: coin.name,
        ticker: coin.symbol,
        decimals,
        image: coin.image.and_then(|image| image.small),
    })
}

#[async_trait]
impl PriceOracle for CoinGeckoClient {
    async fn get_token_info(&self, currency: &Currency) -> OracleResult<Option<Currency>> {
        Ok(self
            .token_record(currency)
            .await?
            .map(|record| record.apply(currency)))
    }

    async fn get_prices(&self, currencies: &[Currency]) -> OracleResult<HashMap<String, BigDecimal>> {
        let records = join_all(currencies.iter().map(|c| self.token_record(c))).await;

        let mut coin_for_currency: Vec<(String, String)> = Vec::new();
        for (currency, record) in currencies.iter().zip(records) {
            match record {
                Ok(Some(record)) => coin_for_currency.push((currency.id().to_string(), record.coin_id)),
                Ok(None) => debug!(currency_id = %currency, "no oracle id, skipping price"),
                Err(OracleError::RateLimited) => return Err(OracleError::RateLimited),
                Err(e) => warn!(currency_id = %currency, error = %e, "oracle id lookup failed"),
            }
        }
        if coin_for_currency.is_empty() {
            return Ok(HashMap::new());
        }

        let mut coin_ids: Vec<String> = coin_for_currency.iter().map(|(_, c)| c.clone()).collect();
        coin_ids.sort();
        coin_ids.dedup();

        let prices = self.fetch_prices(&coin_ids).await?;
        Ok(coin_for_currency
            .into_iter()
            .filter_map(|(currency_id, coin_id)| {
                prices.get(&coin_id).map(|price| (currency_id, price.clone()))
            })
            .collect())
    }

    async fn ping(&self) -> OracleResult<()> {
        let url = format!("{}/ping", self.config.base_url.trim_end_matches('/'));
        let headers = self.headers();
        let _: JsonValue = self.http.get_json(&url, &headers).await?;
        Ok(())
    }
}
