//! Quote engine behavior against the mocked oracle and exchange

mod common;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use crosspay_backend::currency::Currency;
use crosspay_backend::services::{OracleError, OracleResult, PriceOracle, QuoteEngine, QuoteError};

fn tokens() -> (Currency, Currency, Currency) {
    (
        base_token("0x00000000000000000000000000000000000000a1"),
        base_token("0x00000000000000000000000000000000000000a2"),
        base_token("0x00000000000000000000000000000000000000b1"),
    )
}

fn engine(oracle: MockPriceOracle, exchange: MockBridgeExchange) -> QuoteEngine {
    QuoteEngine::new(Arc::new(oracle), Arc::new(exchange)).with_concurrency(2)
}

#[tokio::test]
async fn test_equal_cost_quotes_order_by_source_id() {
    let (x, y, d) = tokens();
    let oracle = MockPriceOracle::new(&[(&x, "2"), (&y, "4"), (&d, "1")]);
    let exchange = MockBridgeExchange::at_prices(&oracle.prices);

    let quotes = engine(oracle, exchange)
        .quote_usd(&[y.clone(), x.clone()], &[d], &dec("100"))
        .await
        .unwrap();

    let sources: Vec<&Currency> = quotes.iter().map(|q| &q.source.currency).collect();
    assert_eq!(sources, vec![&x, &y]);
    assert_eq!(quotes[0].source.ui_amount, dec("50"));
    assert_eq!(quotes[1].source.ui_amount, dec("25"));
}

#[tokio::test]
async fn test_one_failing_source_does_not_sink_the_rest() {
    let (x, y, d) = tokens();
    let oracle = MockPriceOracle::new(&[(&x, "2"), (&y, "4"), (&d, "1")]);
    let exchange = MockBridgeExchange::at_prices(&oracle.prices).failing_pair(&y, &d);

    let quotes = engine(oracle, exchange)
        .quote(&[x.clone(), y], &d, &dec("10"))
        .await
        .unwrap();

    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].source.currency, x);
    assert_eq!(quotes[0].source.ui_amount, dec("5"));
}

#[tokio::test]
async fn test_unknown_sources_are_ignored_when_others_price() {
    let (x, y, d) = tokens();
    let oracle = MockPriceOracle::new(&[(&x, "2"), (&d, "1")]);
    let exchange = MockBridgeExchange::at_prices(&oracle.prices);

    let quotes = engine(oracle, exchange)
        .quote(&[y, x.clone()], &d, &dec("10"))
        .await
        .unwrap();

    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].source.currency, x);
}

#[tokio::test]
async fn test_unpriced_destination_fails() {
    let (x, _, d) = tokens();
    let oracle = MockPriceOracle::new(&[(&x, "2")]);
    let exchange = MockBridgeExchange::at_prices(&oracle.prices);

    let err = engine(oracle, exchange)
        .quote(&[x], &d, &dec("10"))
        .await
        .unwrap_err();
    assert!(matches!(err, QuoteError::PriceUnavailable { .. }));
}

#[tokio::test]
async fn test_spread_steers_destination_choice() {
    let (x, _, d1) = tokens();
    let d2 = base_token("0x00000000000000000000000000000000000000b2");
    let oracle = MockPriceOracle::new(&[(&x, "1"), (&d1, "1"), (&d2, "1")]);
    let exchange = MockBridgeExchange::at_prices(&oracle.prices)
        .with_spread(&d1, "1.05")
        .with_spread(&d2, "1.01");

    let quotes = engine(oracle, exchange)
        .quote_usd(&[x], &[d1, d2.clone()], &dec("200"))
        .await
        .unwrap();

    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].destination.currency, d2);
    assert_eq!(quotes[0].source.ui_amount, dec("202"));
}

/// Oracle whose provider quota is spent
struct ThrottledOracle;

#[async_trait]
impl PriceOracle for ThrottledOracle {
    async fn get_token_info(&self, _currency: &Currency) -> OracleResult<Option<Currency>> {
        Err(OracleError::RateLimited)
    }

    async fn get_prices(&self, _currencies: &[Currency]) -> OracleResult<HashMap<String, BigDecimal>> {
        Err(OracleError::RateLimited)
    }
}

#[tokio::test]
async fn test_rate_limited_oracle_is_reported_as_such() {
    let (x, _, d) = tokens();
    let exchange = MockBridgeExchange::at_prices(&MockPriceOracle::new(&[(&x, "2"), (&d, "1")]).prices);
    let engine = QuoteEngine::new(Arc::new(ThrottledOracle), Arc::new(exchange));

    let err = engine
        .quote_usd(&[x], &[d], &dec("100"))
        .await
        .unwrap_err();
    assert_eq!(err, QuoteError::Oracle(OracleError::RateLimited));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_larger_sale_never_costs_less(low in 1u32..100_000, extra in 0u32..100_000) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (x, _, d) = tokens();
        let oracle = MockPriceOracle::new(&[(&x, "3"), (&d, "1")]);
        let exchange = MockBridgeExchange::at_prices(&oracle.prices).with_spread(&d, "1.02");
        let engine = engine(oracle, exchange);

        // cents
        let small = dec(&low.to_string()) / dec("100");
        let large = dec(&(low + extra).to_string()) / dec("100");

        let (a, b) = rt.block_on(async {
            let a = engine.quote_usd(&[x.clone()], &[d.clone()], &small).await.unwrap();
            let b = engine.quote_usd(&[x.clone()], &[d.clone()], &large).await.unwrap();
            (a, b)
        });

        prop_assert!(a[0].source.raw_amount <= b[0].source.raw_amount);
        prop_assert!(a[0].destination.raw_amount <= b[0].destination.raw_amount);
    }
}
