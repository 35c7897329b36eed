//! Bridging exchange client (ChangeNow v2)
//!
//! Currencies are mapped onto the exchange's ticker/network naming through the
//! cached currency list. Amounts cross the wire as 8-decimal UI amounts.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::http_client::{ApiHttpClient, HttpError};
use super::json_decimal;
use crate::cache::keys::exchange::{CurrencyListKey, CurrencyLookupKey};
use crate::cache::{Cache, CacheExt};
use crate::currency::{Currency, ServiceType};
use crate::logging::mask_address;

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Precision ChangeNow accepts for amounts
const AMOUNT_SCALE: i64 = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Network of currency {currency_id} is not supported by the exchange")]
    UnsupportedNetwork { currency_id: String },

    #[error("Currency {currency_id} is not listed on the exchange")]
    UnsupportedCurrency { currency_id: String },

    #[error("Exchange rate limit exceeded")]
    RateLimited,

    #[error("Exchange request failed: {0}")]
    Http(HttpError),

    #[error("Invalid exchange response: {message}")]
    InvalidResponse { message: String },
}

impl ExchangeError {
    pub fn unsupported_network(currency: &Currency) -> Self {
        Self::UnsupportedNetwork {
            currency_id: currency.id().to_string(),
        }
    }

    pub fn unsupported_currency(currency: &Currency) -> Self {
        Self::UnsupportedCurrency {
            currency_id: currency.id().to_string(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ExchangeError::UnsupportedNetwork { .. } | ExchangeError::UnsupportedCurrency { .. }
        )
    }
}

impl From<HttpError> for ExchangeError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::RateLimited { .. } => ExchangeError::RateLimited,
            other => ExchangeError::Http(other),
        }
    }
}

/// Which side of an estimate is fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `amount` is what the payer sends
    Forward,
    /// `amount` is what must arrive
    Reverse,
}

impl Direction {
    fn as_api_type(&self) -> &'static str {
        match self {
            Direction::Forward => "direct",
            Direction::Reverse => "reverse",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeCreated {
    pub exchange_id: String,
    pub deposit_address: String,
    pub from_amount: BigDecimal,
    pub to_amount: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeState {
    New,
    Waiting,
    Confirming,
    Exchanging,
    Sending,
    Finished,
    Failed,
    Refunded,
    Expired,
}

impl ExchangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeState::New => "new",
            ExchangeState::Waiting => "waiting",
            ExchangeState::Confirming => "confirming",
            ExchangeState::Exchanging => "exchanging",
            ExchangeState::Sending => "sending",
            ExchangeState::Finished => "finished",
            ExchangeState::Failed => "failed",
            ExchangeState::Refunded => "refunded",
            ExchangeState::Expired => "expired",
        }
    }

    /// The deposit has cleared the exchange's own confirmation step
    pub fn deposit_confirmed(&self) -> bool {
        matches!(
            self,
            ExchangeState::Exchanging | ExchangeState::Sending | ExchangeState::Finished
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Finished
                | ExchangeState::Failed
                | ExchangeState::Refunded
                | ExchangeState::Expired
        )
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeStatus {
    pub exchange_id: String,
    pub state: ExchangeState,
    pub deposit_tx_hash: Option<String>,
    pub payout_tx_hash: Option<String>,
    pub confirmed: bool,
}

#[async_trait]
pub trait BridgeExchange: Send + Sync {
    /// Name recorded as the routing service on orders
    fn name(&self) -> &'static str;

    async fn is_supported(&self, currency: &Currency) -> ExchangeResult<bool>;

    /// Counterpart UI amount for `amount` (source side when Forward,
    /// destination side when Reverse)
    async fn estimate(
        &self,
        source: &Currency,
        destination: &Currency,
        amount: &BigDecimal,
        direction: Direction,
    ) -> ExchangeResult<BigDecimal>;

    async fn exchange(
        &self,
        source: &Currency,
        destination: &Currency,
        amount: &BigDecimal,
        payout_address: &str,
        refund_address: &str,
    ) -> ExchangeResult<ExchangeCreated>;

    async fn get_status(&self, exchange_id: &str) -> ExchangeResult<ExchangeStatus>;
}

#[derive(Debug, Clone)]
pub struct ChangeNowConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub currency_cache_ttl: Duration,
}

impl Default for ChangeNowConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.changenow.io/v2".to_string(),
            api_key: None,
            currency_cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Entry of `/exchange/currencies`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedCurrency {
    pub ticker: String,
    pub network: String,
    #[serde(default)]
    pub token_contract: Option<String>,
}

impl ListedCurrency {
    fn is_native(&self) -> bool {
        self.token_contract
            .as_deref()
            .map(|c| c.trim().is_empty())
            .unwrap_or(true)
    }

    fn matches_contract(&self, address: &str) -> bool {
        self.token_contract
            .as_deref()
            .map(|c| c.trim().to_lowercase() == address)
            .unwrap_or(false)
    }
}

/// Match a currency against the exchange's listing
pub fn find_listing<'a>(
    listings: &'a [ListedCurrency],
    currency: &Currency,
) -> ExchangeResult<&'a ListedCurrency> {
    let network = currency
        .chain()
        .and_then(|chain| chain.alias(ServiceType::ChangeNow))
        .ok_or_else(|| ExchangeError::unsupported_network(currency))?;

    let mut on_network = listings.iter().filter(|l| l.network == network).peekable();
    if on_network.peek().is_none() {
        return Err(ExchangeError::unsupported_network(currency));
    }

    let found = if currency.is_native() {
        on_network.find(|l| l.is_native())
    } else {
        let address = currency.address().unwrap_or_default();
        on_network.find(|l| l.matches_contract(address))
    };
    found.ok_or_else(|| ExchangeError::unsupported_currency(currency))
}

fn format_amount(amount: &BigDecimal) -> String {
    amount.round(AMOUNT_SCALE).with_scale(AMOUNT_SCALE).to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimateResponse {
    #[serde(default)]
    from_amount: JsonValue,
    #[serde(default)]
    to_amount: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    id: String,
    payin_address: String,
    #[serde(default)]
    from_amount: JsonValue,
    #[serde(default)]
    to_amount: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    id: String,
    status: ExchangeState,
    #[serde(default)]
    payin_hash: Option<String>,
    #[serde(default)]
    payout_hash: Option<String>,
}

pub struct ChangeNowClient {
    http: ApiHttpClient,
    cache: Arc<dyn Cache>,
    config: ChangeNowConfig,
}

impl ChangeNowClient {
    pub fn new(http: ApiHttpClient, cache: Arc<dyn Cache>, config: ChangeNowConfig) -> Self {
        Self {
            http,
            cache,
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        let mut headers = vec![("content-type", "application/json")];
        if let Some(key) = self.config.api_key.as_deref() {
            headers.push(("x-changenow-api-key", key));
        }
        headers
    }

    async fn listings(&self) -> ExchangeResult<Vec<ListedCurrency>> {
        let key = CurrencyListKey.to_string();
        if let Some(cached) = self.cache.get_or_miss::<Vec<ListedCurrency>>(&key).await {
            return Ok(cached);
        }

        let url = self.url("/exchange/currencies?active=true&flow=standard");
        let headers = self.headers();
        let listings: Vec<ListedCurrency> = self.http.get_json(&url, &headers).await?;
        debug!(count = listings.len(), "fetched exchange currency list");

        self.cache
            .set_quietly(&key, &listings, Some(self.config.currency_cache_ttl))
            .await;
        Ok(listings)
    }

    /// Ticker/network pair the exchange uses for `currency`
    pub async fn lookup(&self, currency: &Currency) -> ExchangeResult<ListedCurrency> {
        let key = CurrencyLookupKey::new(currency.id()).to_string();
        if let Some(cached) = self.cache.get_or_miss::<ListedCurrency>(&key).await {
            return Ok(cached);
        }

        let listings = self.listings().await?;
        let listing = find_listing(&listings, currency)?.clone();

        self.cache
            .set_quietly(&key, &listing, Some(self.config.currency_cache_ttl))
            .await;
        Ok(listing)
    }
}

#[async_trait]
impl BridgeExchange for ChangeNowClient {
    fn name(&self) -> &'static str {
        "CHANGENOW"
    }

    async fn is_supported(&self, currency: &Currency) -> ExchangeResult<bool> {
        match self.lookup(currency).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_unsupported() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn estimate(
        &self,
        source: &Currency,
        destination: &Currency,
        amount: &BigDecimal,
        direction: Direction,
    ) -> ExchangeResult<BigDecimal> {
        let (from, to) = futures::try_join!(self.lookup(source), self.lookup(destination))?;

        let amount_param = match direction {
            Direction::Forward => "fromAmount",
            Direction::Reverse => "toAmount",
        };
        let url = reqwest::Url::parse_with_params(
            &self.url("/exchange/estimated-amount"),
            &[
                ("fromCurrency", from.ticker.as_str()),
                ("toCurrency", to.ticker.as_str()),
                ("fromNetwork", from.network.as_str()),
                ("toNetwork", to.network.as_str()),
                ("flow", "standard"),
                ("type", direction.as_api_type()),
                (amount_param, format_amount(amount).as_str()),
            ],
        )
        .map_err(|e| ExchangeError::invalid_response(format!("invalid estimate url: {}", e)))?;

        let headers = self.headers();
        let response: EstimateResponse = self.http.get_json(url.as_str(), &headers).await?;

        let counterpart = match direction {
            Direction::Forward => &response.to_amount,
            Direction::Reverse => &response.from_amount,
        };
        json_decimal(counterpart)
            .ok_or_else(|| ExchangeError::invalid_response("estimate without counterpart amount"))
    }

    async fn exchange(
        &self,
        source: &Currency,
        destination: &Currency,
        amount: &BigDecimal,
        payout_address: &str,
        refund_address: &str,
    ) -> ExchangeResult<ExchangeCreated> {
        let (from, to) = futures::try_join!(self.lookup(source), self.lookup(destination))?;

        let body = json!({
            "fromCurrency": from.ticker,
            "toCurrency": to.ticker,
            "fromNetwork": from.network,
            "toNetwork": to.network,
            "fromAmount": format_amount(amount),
            "address": payout_address,
            "refundAddress": refund_address,
            "flow": "standard",
            "type": "direct",
        });

        // a replayed create would open a second exchange for the same order
        let headers = self.headers();
        let response: CreateResponse = self
            .http
            .request_json_once(Method::POST, &self.url("/exchange"), Some(&body), &headers)
            .await
            .map_err(|e| {
                warn!(source = %source, destination = %destination, error = %e, "exchange creation failed");
                ExchangeError::from(e)
            })?;

        info!(
            exchange_id = %response.id,
            source = %source,
            destination = %destination,
            deposit_address = %mask_address(&response.payin_address),
            "exchange created"
        );

        Ok(ExchangeCreated {
            from_amount: json_decimal(&response.from_amount).unwrap_or_else(|| amount.clone()),
            to_amount: json_decimal(&response.to_amount)
                .ok_or_else(|| ExchangeError::invalid_response("exchange without toAmount"))?,
            exchange_id: response.id,
            deposit_address: response.payin_address,
        })
    }

    async fn get_status(&self, exchange_id: &str) -> ExchangeResult<ExchangeStatus> {
        let url = reqwest::Url::parse_with_params(&self.url("/exchange/by-id"), &[("id", exchange_id)])
            .map_err(|e| ExchangeError::invalid_response(format!("invalid status url: {}", e)))?;

        let headers = self.headers();
        let response: StatusResponse = self.http.get_json(url.as_str(), &headers).await?;

        Ok(ExchangeStatus {
            confirmed: response.status.deposit_confirmed(),
            exchange_id: response.id,
            state: response.status,
            deposit_tx_hash: response.payin_hash.filter(|h| !h.is_empty()),
            payout_tx_hash: response.payout_hash.filter(|h| !h.is_empty()),
        })
    }
}

impl FromStr for ExchangeState {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(JsonValue::String(s.to_lowercase()))
            .map_err(|_| ExchangeError::invalid_response(format!("unknown exchange status '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::currency::ChainId;
    use axum::{extract::Query, routing::get, routing::post, Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn listing(ticker: &str, network: &str, contract: Option<&str>) -> ListedCurrency {
        ListedCurrency {
            ticker: ticker.to_string(),
            network: network.to_string(),
            token_contract: contract.map(str::to_string),
        }
    }

    fn listings() -> Vec<ListedCurrency> {
        vec![
            listing("eth", "eth", None),
            listing("usdc", "eth", Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
            listing("ethbase", "base", Some("")),
            listing("btc", "btc", None),
        ]
    }

    #[test]
    fn test_find_listing_native_and_token() {
        let all = listings();
        let eth = Currency::native(ChainId::Eth);
        assert_eq!(find_listing(&all, &eth).unwrap().ticker, "eth");

        let base_eth = Currency::native(ChainId::Base);
        assert_eq!(find_listing(&all, &base_eth).unwrap().ticker, "ethbase");

        let usdc = Currency::new(ChainId::Eth, Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")).unwrap();
        assert_eq!(find_listing(&all, &usdc).unwrap().ticker, "usdc");
    }

    #[test]
    fn test_find_listing_unsupported() {
        let all = listings();
        let unknown_token = Currency::new(ChainId::Eth, Some("0xdead")).unwrap();
        assert!(matches!(
            find_listing(&all, &unknown_token),
            Err(ExchangeError::UnsupportedCurrency { .. })
        ));

        // registered chain with no listings
        let sol = Currency::native(ChainId::Sol);
        assert!(matches!(
            find_listing(&all, &sol),
            Err(ExchangeError::UnsupportedNetwork { .. })
        ));

        // chain without an exchange alias
        let fantom = Currency::native(ChainId::Fantom);
        assert!(matches!(
            find_listing(&all, &fantom),
            Err(ExchangeError::UnsupportedNetwork { .. })
        ));
    }

    #[test]
    fn test_amounts_use_eight_decimals() {
        let amount = BigDecimal::from_str("1.123456789").unwrap();
        assert_eq!(format_amount(&amount), "1.12345679");
        assert_eq!(format_amount(&BigDecimal::from(50)), "50.00000000");
    }

    #[test]
    fn test_state_confirmation() {
        assert!(!ExchangeState::Waiting.deposit_confirmed());
        assert!(!ExchangeState::Confirming.deposit_confirmed());
        assert!(ExchangeState::Exchanging.deposit_confirmed());
        assert!(ExchangeState::Finished.is_terminal());
        assert_eq!("Sending".parse::<ExchangeState>().unwrap(), ExchangeState::Sending);
    }

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_estimate_create_and_status() {
        let list_hits = Arc::new(AtomicUsize::new(0));
        let counter = list_hits.clone();
        let router = Router::new()
            .route(
                "/exchange/currencies",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!([
                            { "ticker": "eth", "network": "eth", "tokenContract": null },
                            { "ticker": "btc", "network": "btc", "tokenContract": null }
                        ]))
                    }
                }),
            )
            .route(
                "/exchange/estimated-amount",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    assert_eq!(params.get("type").map(String::as_str), Some("reverse"));
                    assert_eq!(params.get("toAmount").map(String::as_str), Some("0.01000000"));
                    Json(json!({ "fromAmount": 0.25, "toAmount": 0.01 }))
                }),
            )
            .route(
                "/exchange",
                post(|Json(body): Json<JsonValue>| async move {
                    assert_eq!(body["fromCurrency"], "eth");
                    Json(json!({
                        "id": "abc123", "payinAddress": "0xdeposit",
                        "fromAmount": 0.25, "toAmount": 0.0099
                    }))
                }),
            )
            .route(
                "/exchange/by-id",
                get(|| async {
                    Json(json!({ "id": "abc123", "status": "exchanging", "payinHash": "0xhash", "payoutHash": null }))
                }),
            );
        let base = spawn_server(router).await;

        let client = ChangeNowClient::new(
            ApiHttpClient::new("changenow", Duration::from_secs(5), 0).unwrap(),
            Arc::new(MemoryCache::new()),
            ChangeNowConfig {
                base_url: base,
                ..Default::default()
            },
        );

        let eth = Currency::native(ChainId::Eth);
        let btc = Currency::native(ChainId::Btc);

        let source_needed = client
            .estimate(&eth, &btc, &BigDecimal::from_str("0.01").unwrap(), Direction::Reverse)
            .await
            .unwrap();
        assert_eq!(source_needed, BigDecimal::from_str("0.25").unwrap());

        let created = client
            .exchange(&eth, &btc, &source_needed, "bc1payout", "0xrefund")
            .await
            .unwrap();
        assert_eq!(created.exchange_id, "abc123");
        assert_eq!(created.deposit_address, "0xdeposit");

        let status = client.get_status("abc123").await.unwrap();
        assert!(status.confirmed);
        assert_eq!(status.deposit_tx_hash.as_deref(), Some("0xhash"));

        assert!(!client
            .is_supported(&Currency::native(ChainId::Sol))
            .await
            .unwrap());
        // the currency list is fetched once and then served from cache
        assert_eq!(list_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_exchange_creation_is_not_replayed() {
        let posts = Arc::new(AtomicUsize::new(0));
        let counter = posts.clone();
        let router = Router::new()
            .route(
                "/exchange/currencies",
                get(|| async {
                    Json(json!([
                        { "ticker": "eth", "network": "eth", "tokenContract": null },
                        { "ticker": "btc", "network": "btc", "tokenContract": null }
                    ]))
                }),
            )
            .route(
                "/exchange",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            (axum::http::StatusCode::BAD_GATEWAY, "upstream hiccup".to_string())
                        } else {
                            (
                                axum::http::StatusCode::OK,
                                json!({
                                    "id": "second", "payinAddress": "0xother",
                                    "fromAmount": 0.25, "toAmount": 0.0099
                                })
                                .to_string(),
                            )
                        }
                    }
                }),
            );
        let base = spawn_server(router).await;

        let client = ChangeNowClient::new(
            ApiHttpClient::new("changenow", Duration::from_secs(5), 2).unwrap(),
            Arc::new(MemoryCache::new()),
            ChangeNowConfig {
                base_url: base,
                ..Default::default()
            },
        );

        let err = client
            .exchange(
                &Currency::native(ChainId::Eth),
                &Currency::native(ChainId::Btc),
                &BigDecimal::from_str("0.25").unwrap(),
                "bc1payout",
                "0xrefund",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::Http(HttpError::Status { status: 502, .. })));
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }
}
