//! Shared fixtures for the integration tests: in-process stand-ins for the
//! price oracle, the bridge exchange and a chain, wired into a real
//! `PayOrderService` over the in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crosspay_backend::chains::{
    Balance, ChainAdapter, ChainAggregator, ChainError, ChainResult, Transfer, TransferInfo,
};
use crosspay_backend::currency::{ChainId, Currency, CurrencyMetadata};
use crosspay_backend::database::repository::{Organization, SettlementCurrency};
use crosspay_backend::database::{InMemoryOrganizationStore, InMemoryPayOrderStore};
use crosspay_backend::services::bridge_exchange::{
    Direction, ExchangeCreated, ExchangeError, ExchangeResult, ExchangeState, ExchangeStatus,
};
use crosspay_backend::services::{
    BridgeExchange, OracleResult, PayOrderService, PayOrderServiceConfig, PriceOracle, QuoteEngine,
};

pub const PAYER: &str = "0x00000000000000000000000000000000000000aa";
pub const DEPOSIT_ADDRESS: &str = "0x00000000000000000000000000000000000000dd";
pub const SETTLEMENT_ADDRESS: &str = "0x00000000000000000000000000000000000000ee";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn base_token(address: &str) -> Currency {
    Currency::new(ChainId::Base, Some(address)).unwrap()
}

/// Prices from a fixed table; every listed currency has 6 decimals
pub struct MockPriceOracle {
    pub prices: HashMap<String, BigDecimal>,
}

impl MockPriceOracle {
    pub fn new(prices: &[(&Currency, &str)]) -> Self {
        Self {
            prices: prices
                .iter()
                .map(|(c, p)| (c.id().to_string(), dec(p)))
                .collect(),
        }
    }
}

#[async_trait]
impl PriceOracle for MockPriceOracle {
    async fn get_token_info(&self, currency: &Currency) -> OracleResult<Option<Currency>> {
        if !self.prices.contains_key(currency.id()) {
            return Ok(None);
        }
        Ok(Some(currency.clone().with_metadata(CurrencyMetadata {
            decimals: Some(6),
            ..Default::default()
        })))
    }

    async fn get_prices(&self, currencies: &[Currency]) -> OracleResult<HashMap<String, BigDecimal>> {
        Ok(currencies
            .iter()
            .filter_map(|c| self.prices.get(c.id()).map(|p| (c.id().to_string(), p.clone())))
            .collect())
    }
}

/// Arguments of one `exchange` call
#[derive(Debug, Clone)]
pub struct ExchangeCall {
    pub source_id: String,
    pub destination_id: String,
    pub amount: BigDecimal,
    pub payout_address: String,
    pub refund_address: String,
}

/// Estimates at oracle prices times a per-destination spread. Pairs listed
/// in `failing` error out; `exchange` calls are recorded.
#[derive(Default)]
pub struct MockBridgeExchange {
    pub prices: HashMap<String, BigDecimal>,
    pub spread: HashMap<String, BigDecimal>,
    pub failing: HashSet<(String, String)>,
    pub calls: Mutex<Vec<ExchangeCall>>,
}

impl MockBridgeExchange {
    pub fn at_prices(prices: &HashMap<String, BigDecimal>) -> Self {
        Self {
            prices: prices.clone(),
            ..Default::default()
        }
    }

    pub fn with_spread(mut self, currency: &Currency, spread: &str) -> Self {
        self.spread.insert(currency.id().to_string(), dec(spread));
        self
    }

    pub fn failing_pair(mut self, source: &Currency, destination: &Currency) -> Self {
        self.failing
            .insert((source.id().to_string(), destination.id().to_string()));
        self
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl BridgeExchange for MockBridgeExchange {
    fn name(&self) -> &'static str {
        "MOCK_EXCHANGE"
    }

    async fn is_supported(&self, currency: &Currency) -> ExchangeResult<bool> {
        Ok(self.prices.contains_key(currency.id()))
    }

    async fn estimate(
        &self,
        source: &Currency,
        destination: &Currency,
        amount: &BigDecimal,
        _direction: Direction,
    ) -> ExchangeResult<BigDecimal> {
        if self
            .failing
            .contains(&(source.id().to_string(), destination.id().to_string()))
        {
            return Err(ExchangeError::unsupported_currency(destination));
        }
        let spread = self
            .spread
            .get(destination.id())
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(1));
        Ok(amount * &self.prices[destination.id()] / &self.prices[source.id()] * spread)
    }

    async fn exchange(
        &self,
        source: &Currency,
        destination: &Currency,
        amount: &BigDecimal,
        payout_address: &str,
        refund_address: &str,
    ) -> ExchangeResult<ExchangeCreated> {
        let mut calls = self.calls.lock().await;
        calls.push(ExchangeCall {
            source_id: source.id().to_string(),
            destination_id: destination.id().to_string(),
            amount: amount.clone(),
            payout_address: payout_address.to_string(),
            refund_address: refund_address.to_string(),
        });
        Ok(ExchangeCreated {
            exchange_id: format!("ex-{}", calls.len()),
            deposit_address: DEPOSIT_ADDRESS.to_string(),
            from_amount: amount.clone(),
            to_amount: BigDecimal::from(0),
        })
    }

    async fn get_status(&self, exchange_id: &str) -> ExchangeResult<ExchangeStatus> {
        Ok(ExchangeStatus {
            exchange_id: exchange_id.to_string(),
            state: ExchangeState::Waiting,
            deposit_tx_hash: None,
            payout_tx_hash: None,
            confirmed: false,
        })
    }
}

/// One chain whose answers the test controls
pub struct MockChainAdapter {
    pub chain_id: ChainId,
    pub balances: Mutex<Vec<Balance>>,
    pub transfer: Mutex<ChainResult<Option<Transfer>>>,
}

impl MockChainAdapter {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            balances: Mutex::new(Vec::new()),
            transfer: Mutex::new(Ok(None)),
        }
    }

    pub async fn set_balances(&self, balances: Vec<Balance>) {
        *self.balances.lock().await = balances;
    }

    pub async fn set_transfer(&self, transfer: ChainResult<Option<Transfer>>) {
        *self.transfer.lock().await = transfer;
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_wallet_balances(&self, _address: &str) -> ChainResult<Vec<Balance>> {
        Ok(self.balances.lock().await.clone())
    }

    async fn get_transfer_details(&self, tx_hash: &str) -> ChainResult<Option<Transfer>> {
        match &*self.transfer.lock().await {
            Ok(Some(transfer)) if transfer.tx_hash() == tx_hash => Ok(Some(transfer.clone())),
            Ok(_) => Ok(None),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Account-model transfer of `raw_amount` from the payer to the deposit address
pub fn transfer(tx_hash: &str, currency: &Currency, raw_amount: &str, confirmed: bool) -> Transfer {
    TransferInfo {
        tx_hash: tx_hash.to_string(),
        currency: currency.clone(),
        source_address: PAYER.to_string(),
        destination_address: DEPOSIT_ADDRESS.to_string(),
        raw_amount: dec(raw_amount),
        confirmed,
    }
    .into()
}

pub fn failed_transaction(tx_hash: &str) -> ChainError {
    ChainError::TransactionFailed {
        tx_hash: tx_hash.to_string(),
        reason: "reverted".to_string(),
    }
}

pub fn organization(settlements: &[&Currency]) -> Organization {
    Organization {
        id: Uuid::new_v4(),
        name: "Test Merchant".to_string(),
        settlement_currencies: settlements
            .iter()
            .map(|c| SettlementCurrency {
                currency_id: c.id().to_string(),
                settlement_address: SETTLEMENT_ADDRESS.to_string(),
            })
            .collect(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Everything a flow test touches
pub struct Harness {
    pub service: Arc<PayOrderService>,
    pub orders: Arc<InMemoryPayOrderStore>,
    pub organizations: Arc<InMemoryOrganizationStore>,
    pub exchange: Arc<MockBridgeExchange>,
    pub chain: Arc<MockChainAdapter>,
}

impl Harness {
    pub fn new(prices: &[(&Currency, &str)]) -> Self {
        Self::with_window(prices, Duration::from_secs(15 * 60))
    }

    /// `reservation_window` of zero makes every reservation lapse at once
    pub fn with_window(prices: &[(&Currency, &str)], reservation_window: Duration) -> Self {
        let oracle = MockPriceOracle::new(prices);
        let exchange = Arc::new(MockBridgeExchange::at_prices(&oracle.prices));
        Self::build(oracle, exchange, reservation_window)
    }

    /// Same wiring with the mocked chain answering for `chain_id`
    pub fn on_chain(chain_id: ChainId, prices: &[(&Currency, &str)]) -> Self {
        let oracle = MockPriceOracle::new(prices);
        let exchange = Arc::new(MockBridgeExchange::at_prices(&oracle.prices));
        Self::build_on(chain_id, oracle, exchange, Duration::from_secs(15 * 60))
    }

    pub fn build(
        oracle: MockPriceOracle,
        exchange: Arc<MockBridgeExchange>,
        reservation_window: Duration,
    ) -> Self {
        Self::build_on(ChainId::Base, oracle, exchange, reservation_window)
    }

    fn build_on(
        chain_id: ChainId,
        oracle: MockPriceOracle,
        exchange: Arc<MockBridgeExchange>,
        reservation_window: Duration,
    ) -> Self {
        let chain = Arc::new(MockChainAdapter::new(chain_id));
        let orders = Arc::new(InMemoryPayOrderStore::new());
        let organizations = Arc::new(InMemoryOrganizationStore::new());
        let quotes = Arc::new(QuoteEngine::new(Arc::new(oracle), exchange.clone()));
        let aggregator = Arc::new(ChainAggregator::new(vec![chain.clone() as Arc<dyn ChainAdapter>]));

        let service = Arc::new(PayOrderService::new(
            orders.clone(),
            organizations.clone(),
            aggregator,
            quotes,
            PayOrderServiceConfig {
                reservation_window,
                ..Default::default()
            },
        ));

        Self {
            service,
            orders,
            organizations,
            exchange,
            chain,
        }
    }
}
