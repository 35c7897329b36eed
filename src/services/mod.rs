//! Services module for pricing, bridging, quoting and order orchestration

pub mod bridge_exchange;
pub mod http_client;
pub mod payorder;
pub mod price_oracle;
pub mod quote;

use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;

pub use bridge_exchange::{
    BridgeExchange, ChangeNowClient, ChangeNowConfig, Direction, ExchangeCreated, ExchangeError,
    ExchangeResult, ExchangeState, ExchangeStatus,
};
pub use http_client::{ApiHttpClient, HttpError, HttpResult};
pub use payorder::{
    CreatePayOrderRequest, PayOrder, PayOrderError, PayOrderMode, PayOrderResult, PayOrderService,
    PayOrderServiceConfig, PayOrderStatus, PaymentDetails, QuotedCurrency,
};
pub use price_oracle::{CoinGeckoClient, CoinGeckoConfig, OracleError, OracleResult, PriceOracle};
pub use quote::{best_quote, QuoteEngine, QuoteError, QuoteResult};

/// Decimal from a JSON number or numeric string, without a float round-trip
pub(crate) fn json_decimal(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}
