use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{PayOrderError, PayOrderResult};
use super::model::{NewPayOrder, PayOrder, PayOrderMode, PayOrderStatus, Reservation};
use crate::chains::{
    validate_transfer, ChainAggregator, ChainError, ExpectedTransfer, Transfer,
};
use crate::currency::{
    ChainId, ChainType, Currency, CurrencyAmount, CurrencyRef, CurrencyToCurrencyQuote,
};
use crate::database::repository::{Organization, OrganizationStore, PayOrderStore};
use crate::logging::mask_address;
use crate::services::bridge_exchange::ExchangeStatus;
use crate::services::quote::{QuoteEngine, QuoteError, DEFAULT_QUOTE_CONCURRENCY};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct PayOrderServiceConfig {
    /// How long a reserved deposit address stays valid
    pub reservation_window: Duration,
    pub quote_concurrency: usize,
    /// Upper bound on one quote or reservation fan-out
    pub quote_timeout: Duration,
}

impl Default for PayOrderServiceConfig {
    fn default() -> Self {
        Self {
            reservation_window: Duration::from_secs(15 * 60),
            quote_concurrency: DEFAULT_QUOTE_CONCURRENCY,
            quote_timeout: Duration::from_secs(30),
        }
    }
}

impl PayOrderServiceConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("PAYORDER_RESERVATION_MINUTES") {
            if let Ok(n) = v.parse::<u64>() {
                config.reservation_window = Duration::from_secs(n * 60);
            }
        }
        if let Ok(v) = std::env::var("QUOTE_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                config.quote_concurrency = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("QUOTE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                config.quote_timeout = Duration::from_secs(n);
            }
        }

        config
    }
}

/// Input to `create_payorder`. `destination_amount` is in UI units.
#[derive(Debug, Clone)]
pub struct CreatePayOrderRequest {
    pub organization_id: Uuid,
    pub mode: PayOrderMode,
    pub destination_currency: Option<CurrencyRef>,
    pub destination_amount: Option<BigDecimal>,
    pub destination_value_usd: Option<BigDecimal>,
    pub destination_receiving_address: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// A payable source currency with the payer's balance of it
#[derive(Debug, Clone, Serialize)]
pub struct QuotedCurrency {
    pub quote: CurrencyToCurrencyQuote,
    pub balance: CurrencyAmount,
    pub sufficient_balance: bool,
}

/// What the payer needs to send, and where
#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetails {
    pub payorder: PayOrder,
    pub deposit_address: String,
    pub source: CurrencyAmount,
    pub destination: CurrencyAmount,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Per-order async locks so reservation and transfer processing for one
/// order run one at a time inside this process
#[derive(Default)]
struct OrderLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // entries nobody holds any more
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

const PAYMENT_DETAILS: &str = "reserve payment details";
const PROCESS_TXHASH: &str = "process a payment transaction";

/// Drives a pay order from creation to a verified payment
pub struct PayOrderService {
    orders: Arc<dyn PayOrderStore>,
    organizations: Arc<dyn OrganizationStore>,
    chains: Arc<ChainAggregator>,
    quotes: Arc<QuoteEngine>,
    config: PayOrderServiceConfig,
    locks: OrderLocks,
}

impl PayOrderService {
    pub fn new(
        orders: Arc<dyn PayOrderStore>,
        organizations: Arc<dyn OrganizationStore>,
        chains: Arc<ChainAggregator>,
        quotes: Arc<QuoteEngine>,
        config: PayOrderServiceConfig,
    ) -> Self {
        Self {
            orders,
            organizations,
            chains,
            quotes,
            config,
            locks: OrderLocks::default(),
        }
    }

    pub fn config(&self) -> &PayOrderServiceConfig {
        &self.config
    }

    pub async fn create_payorder(&self, request: CreatePayOrderRequest) -> PayOrderResult<PayOrder> {
        let organization = self.organization(request.organization_id).await?;

        let destination = match &request.destination_currency {
            Some(reference) => Some(self.resolve_currency(reference).await?),
            None => None,
        };

        let new_order = match request.mode {
            PayOrderMode::Deposit => {
                let destination = destination.ok_or_else(|| {
                    PayOrderError::invalid_request("DEPOSIT requires a destination currency")
                })?;
                let amount = positive(request.destination_amount, "destination_amount")?;
                let address = request
                    .destination_receiving_address
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(|| {
                        PayOrderError::invalid_request("DEPOSIT requires a receiving address")
                    })?;
                if request.destination_value_usd.is_some() {
                    return Err(PayOrderError::invalid_request(
                        "DEPOSIT takes a destination amount, not a USD value",
                    ));
                }

                NewPayOrder {
                    organization_id: organization.id,
                    mode: PayOrderMode::Deposit,
                    destination_currency_id: Some(destination.id().to_string()),
                    destination_amount: Some(destination.ui_to_raw(&amount)?),
                    destination_value_usd: None,
                    destination_receiving_address: Some(address.trim().to_string()),
                    metadata: request.metadata.unwrap_or(JsonValue::Null),
                }
            }
            PayOrderMode::Sale => {
                let value_usd = positive(request.destination_value_usd, "destination_value_usd")?;
                if request.destination_amount.is_some() {
                    return Err(PayOrderError::invalid_request(
                        "SALE takes a USD value, not a destination amount",
                    ));
                }
                if organization.settlement_currencies.is_empty() {
                    return Err(PayOrderError::invalid_request(
                        "organization has no settlement currencies",
                    ));
                }

                // A pinned currency must be one the merchant settles in
                let (currency_id, address) = match &destination {
                    Some(currency) => {
                        let settlement = organization.settlement_for(currency.id()).ok_or_else(|| {
                            PayOrderError::invalid_currency(
                                currency.id(),
                                "not a settlement currency of the organization",
                            )
                        })?;
                        (
                            Some(currency.id().to_string()),
                            Some(settlement.settlement_address.clone()),
                        )
                    }
                    None => (None, None),
                };

                NewPayOrder {
                    organization_id: organization.id,
                    mode: PayOrderMode::Sale,
                    destination_currency_id: currency_id,
                    destination_amount: None,
                    destination_value_usd: Some(value_usd),
                    destination_receiving_address: address,
                    metadata: request.metadata.unwrap_or(JsonValue::Null),
                }
            }
        };

        let order = self.orders.create(new_order).await?;
        info!(
            payorder_id = %order.id,
            organization_id = %order.organization_id,
            mode = %order.mode,
            "pay order created"
        );
        Ok(order)
    }

    pub async fn get(&self, payorder_id: Uuid) -> PayOrderResult<PayOrder> {
        self.orders
            .find_by_id(payorder_id)
            .await?
            .ok_or(PayOrderError::NotFound { payorder_id })
    }

    /// Quotes for every currency the wallet holds that the exchange can route.
    /// Read-only; callable in any status.
    pub async fn quote(
        &self,
        payorder_id: Uuid,
        wallet_address: &str,
        chain_type: ChainType,
        chain_ids: Option<&[ChainId]>,
    ) -> PayOrderResult<Vec<QuotedCurrency>> {
        let order = self.get(payorder_id).await?;

        self.with_timeout(async {
            let balances = self
                .chains
                .get_wallet_balances(wallet_address, chain_type, chain_ids, true)
                .await?;
            let held: Vec<Currency> = balances.iter().map(|b| b.currency.clone()).collect();
            let routable = self.quotes.supported_by_exchange(held).await;
            if routable.is_empty() {
                info!(
                    payorder_id = %payorder_id,
                    wallet = %mask_address(wallet_address),
                    "wallet holds nothing routable"
                );
                return Ok(Vec::new());
            }

            let quotes = self.route(&order, &routable).await?;
            let raw_balances: HashMap<&str, &BigDecimal> = balances
                .iter()
                .map(|b| (b.currency.id(), &b.raw_amount))
                .collect();

            let mut quoted = Vec::with_capacity(quotes.len());
            for quote in quotes {
                let raw = raw_balances
                    .get(quote.source.currency.id())
                    .map(|raw| (*raw).clone())
                    .unwrap_or_else(|| BigDecimal::from(0));
                let balance = CurrencyAmount::from_raw(quote.source.currency.clone(), raw)?;
                let sufficient_balance = balance.raw_amount >= quote.source.raw_amount;
                quoted.push(QuotedCurrency {
                    quote,
                    balance,
                    sufficient_balance,
                });
            }
            Ok(quoted)
        })
        .await
    }

    /// Reserve a quote and open the bridge deposit. Only a PENDING order can
    /// be reserved, exactly once.
    pub async fn payment_details(
        &self,
        payorder_id: Uuid,
        source_currency: CurrencyRef,
        refund_address: &str,
    ) -> PayOrderResult<PaymentDetails> {
        let refund_address = refund_address.trim();
        if refund_address.is_empty() {
            return Err(PayOrderError::invalid_request("refund address is required"));
        }
        let source = source_currency.resolve()?;

        let _guard = self.locks.acquire(payorder_id).await;
        let order = self.get(payorder_id).await?;
        if order.status != PayOrderStatus::Pending {
            return Err(PayOrderError::invalid_state(payorder_id, order.status, PAYMENT_DETAILS));
        }

        let quote = self
            .with_timeout(async {
                self.route(&order, std::slice::from_ref(&source))
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(PayOrderError::Quote(QuoteError::NoViableQuote))
            })
            .await?;

        let payout_address = self.payout_address(&order, &quote.destination.currency).await?;
        let exchange = self.quotes.exchange();
        let created = exchange
            .exchange(
                &quote.source.currency,
                &quote.destination.currency,
                &quote.source.ui_amount,
                &payout_address,
                refund_address,
            )
            .await?;

        // the payer is held to what the exchange expects, never less than quoted
        let source_ui = if created.from_amount > quote.source.ui_amount {
            created.from_amount.clone()
        } else {
            quote.source.ui_amount.clone()
        };
        let source_amount = CurrencyAmount::from_ui(quote.source.currency.clone(), source_ui)?;
        let destination_amount = match (order.mode, &order.destination_amount) {
            (PayOrderMode::Deposit, Some(raw)) => raw.clone(),
            _ => quote.destination.raw_amount.clone(),
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.config.reservation_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let reservation = Reservation {
            source_currency_id: source_amount.currency.id().to_string(),
            source_amount: source_amount.raw_amount.clone(),
            source_deposit_address: created.deposit_address.clone(),
            refund_address: refund_address.to_string(),
            destination_currency_id: quote.destination.currency.id().to_string(),
            destination_amount,
            destination_receiving_address: payout_address,
            routing_service: exchange.name().to_string(),
            routing_reference: created.exchange_id.clone(),
            expires_at,
        };

        let reserved = match self.orders.reserve(payorder_id, &reservation).await? {
            Some(order) => order,
            None => {
                let current = self.get(payorder_id).await?;
                warn!(
                    payorder_id = %payorder_id,
                    exchange_id = %created.exchange_id,
                    status = %current.status,
                    "reservation lost to a concurrent update"
                );
                return Err(PayOrderError::invalid_state(payorder_id, current.status, PAYMENT_DETAILS));
            }
        };

        info!(
            payorder_id = %payorder_id,
            source = %source_amount.currency,
            destination = %quote.destination.currency,
            deposit_address = %mask_address(&created.deposit_address),
            exchange_id = %created.exchange_id,
            "payment details reserved"
        );

        Ok(PaymentDetails {
            deposit_address: created.deposit_address,
            source: source_amount,
            destination: quote.destination,
            expires_at,
            payorder: reserved,
        })
    }

    /// Verify the payer's transaction against the reserved terms, on the chain
    /// of the order's own source currency
    pub async fn process_payment_txhash(&self, payorder_id: Uuid, tx_hash: &str) -> PayOrderResult<PayOrder> {
        let tx_hash = tx_hash.trim();
        if tx_hash.is_empty() {
            return Err(PayOrderError::invalid_request("transaction hash is required"));
        }

        let _guard = self.locks.acquire(payorder_id).await;
        let order = self.get(payorder_id).await?;
        if !matches!(
            order.status,
            PayOrderStatus::AwaitingPayment | PayOrderStatus::AwaitingConfirmation
        ) {
            return Err(PayOrderError::invalid_state(payorder_id, order.status, PROCESS_TXHASH));
        }
        if let Some(existing) = order.source_transaction_hash.as_deref() {
            if existing != tx_hash {
                return Err(PayOrderError::invalid_state(payorder_id, order.status, PROCESS_TXHASH));
            }
        }

        let expected = self.expected_transfer(&order)?;
        let outcome = match self
            .chains
            .get_transfer_details(tx_hash, expected.currency.chain_id())
            .await
        {
            Ok(Some(transfer)) => self.check_transfer(&transfer, &expected),
            Ok(None) | Err(ChainError::TransactionNotFound { .. }) => Ok(false),
            Err(
                e @ (ChainError::TransactionFailed { .. }
                | ChainError::DoubleSpend { .. }
                | ChainError::NoTransferFound { .. }),
            ) => Err(e.to_string()),
            Err(e) => return Err(e.into()),
        };

        let from = [
            PayOrderStatus::AwaitingPayment,
            PayOrderStatus::AwaitingConfirmation,
        ];
        let (next, failure) = match outcome {
            Ok(true) => (PayOrderStatus::Received, None),
            Ok(false) => (PayOrderStatus::AwaitingConfirmation, None),
            Err(reason) => (PayOrderStatus::Failed, Some(reason)),
        };

        let updated = self
            .orders
            .record_transfer(payorder_id, tx_hash, &from, next)
            .await?
            .ok_or(PayOrderError::invalid_state(payorder_id, order.status, PROCESS_TXHASH))?;

        match failure {
            Some(reason) => {
                warn!(payorder_id = %payorder_id, tx_hash, reason = %reason, "payment failed verification");
                Err(PayOrderError::verification_failed(payorder_id, reason))
            }
            None => {
                info!(payorder_id = %payorder_id, tx_hash, status = %updated.status, "payment transaction processed");
                Ok(updated)
            }
        }
    }

    /// Re-verify an order waiting on confirmations. Still unconfirmed is
    /// reported as `Unconfirmed`.
    pub async fn refresh_confirmation(&self, payorder_id: Uuid) -> PayOrderResult<PayOrder> {
        let order = self.get(payorder_id).await?;
        if order.status != PayOrderStatus::AwaitingConfirmation {
            return Err(PayOrderError::invalid_state(
                payorder_id,
                order.status,
                "refresh confirmation",
            ));
        }
        let tx_hash = order.source_transaction_hash.clone().ok_or_else(|| {
            PayOrderError::invalid_state(payorder_id, order.status, "refresh confirmation")
        })?;

        self.orders.record_confirmation_attempt(payorder_id).await?;
        let updated = self.process_payment_txhash(payorder_id, &tx_hash).await?;
        if updated.status == PayOrderStatus::AwaitingConfirmation {
            return Err(PayOrderError::Unconfirmed { payorder_id, tx_hash });
        }
        Ok(updated)
    }

    /// Lapse a reservation (or an unreserved order)
    pub async fn expire(&self, payorder_id: Uuid) -> PayOrderResult<PayOrder> {
        self.transition(
            payorder_id,
            &[PayOrderStatus::Pending, PayOrderStatus::AwaitingPayment],
            PayOrderStatus::Expired,
            "expire",
        )
        .await
    }

    /// Give up on an order whose transfer never confirmed
    pub async fn fail_unconfirmed(&self, payorder_id: Uuid) -> PayOrderResult<PayOrder> {
        self.transition(
            payorder_id,
            &[PayOrderStatus::AwaitingConfirmation],
            PayOrderStatus::Failed,
            "fail an unconfirmed payment",
        )
        .await
    }

    /// Bridge-side progress of a reserved order
    pub async fn payment_status(&self, payorder_id: Uuid) -> PayOrderResult<ExchangeStatus> {
        let order = self.get(payorder_id).await?;
        let reference = order.routing_reference.as_deref().ok_or_else(|| {
            PayOrderError::invalid_state(payorder_id, order.status, "read payment status")
        })?;
        Ok(self.quotes.exchange().get_status(reference).await?)
    }

    async fn transition(
        &self,
        payorder_id: Uuid,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
        operation: &'static str,
    ) -> PayOrderResult<PayOrder> {
        match self.orders.update_status(payorder_id, from, to).await? {
            Some(order) => {
                info!(payorder_id = %payorder_id, status = %to, "pay order status updated");
                Ok(order)
            }
            None => {
                let current = self.get(payorder_id).await?;
                Err(PayOrderError::invalid_state(payorder_id, current.status, operation))
            }
        }
    }

    async fn with_timeout<T, F>(&self, fut: F) -> PayOrderResult<T>
    where
        F: Future<Output = PayOrderResult<T>>,
    {
        tokio::time::timeout(self.config.quote_timeout, fut)
            .await
            .map_err(|_| PayOrderError::Timeout {
                seconds: self.config.quote_timeout.as_secs(),
            })?
    }

    async fn organization(&self, organization_id: Uuid) -> PayOrderResult<Organization> {
        self.organizations
            .find_by_id(organization_id)
            .await?
            .ok_or(PayOrderError::OrganizationNotFound { organization_id })
    }

    /// Parse a currency reference and resolve it through the price oracle
    async fn resolve_currency(&self, reference: &CurrencyRef) -> PayOrderResult<Currency> {
        let currency = reference.clone().resolve().map_err(|e| {
            let label = match reference {
                CurrencyRef::Id(id) => id.clone(),
                CurrencyRef::Resolved(currency) => currency.id().to_string(),
            };
            PayOrderError::invalid_currency(label, e.to_string())
        })?;
        self.quotes
            .oracle()
            .get_token_info(&currency)
            .await?
            .ok_or_else(|| PayOrderError::invalid_currency(currency.id(), "unknown to the price oracle"))
    }

    /// Quotes for `sources` against the order's destination terms
    async fn route(
        &self,
        order: &PayOrder,
        sources: &[Currency],
    ) -> PayOrderResult<Vec<CurrencyToCurrencyQuote>> {
        match (order.mode, order.destination_currency_id.as_deref()) {
            (PayOrderMode::Deposit, Some(currency_id)) => {
                let destination = self
                    .resolve_currency(&CurrencyRef::Id(currency_id.to_string()))
                    .await?;
                let raw = order.destination_amount.as_ref().ok_or_else(|| {
                    PayOrderError::invalid_request("DEPOSIT order without a destination amount")
                })?;
                let ui = destination.raw_to_ui(raw)?;
                Ok(self.quotes.quote(sources, &destination, &ui).await?)
            }
            (PayOrderMode::Sale, pinned) => {
                let value_usd = order.destination_value_usd.as_ref().ok_or_else(|| {
                    PayOrderError::invalid_request("SALE order without a USD value")
                })?;
                let destinations = match pinned {
                    Some(currency_id) => vec![Currency::from_id(currency_id)?],
                    None => settlement_currencies(&self.organization(order.organization_id).await?),
                };
                Ok(self.quotes.quote_usd(sources, &destinations, value_usd).await?)
            }
            (PayOrderMode::Deposit, None) => Err(PayOrderError::invalid_request(
                "DEPOSIT order without a destination currency",
            )),
        }
    }

    async fn payout_address(&self, order: &PayOrder, destination: &Currency) -> PayOrderResult<String> {
        if let Some(address) = order.destination_receiving_address.as_ref() {
            return Ok(address.clone());
        }
        let organization = self.organization(order.organization_id).await?;
        organization
            .settlement_for(destination.id())
            .map(|s| s.settlement_address.clone())
            .ok_or_else(|| {
                PayOrderError::invalid_currency(destination.id(), "no settlement address configured")
            })
    }

    fn expected_transfer(&self, order: &PayOrder) -> PayOrderResult<ExpectedTransfer> {
        let missing = || PayOrderError::invalid_state(order.id, order.status, PROCESS_TXHASH);
        Ok(ExpectedTransfer {
            currency: Currency::from_id(order.source_currency_id.as_deref().ok_or_else(missing)?)?,
            raw_amount: order.source_amount.clone().ok_or_else(missing)?,
            sender_address: order.refund_address.clone().ok_or_else(missing)?,
            deposit_address: order.source_deposit_address.clone().ok_or_else(missing)?,
        })
    }

    /// `Ok(confirmed)` when the transfer pays the reservation, `Err(reason)` otherwise
    fn check_transfer(&self, transfer: &Transfer, expected: &ExpectedTransfer) -> Result<bool, String> {
        validate_transfer(transfer, expected).map_err(|mismatch| mismatch.to_string())?;
        Ok(transfer.is_confirmed())
    }
}

fn settlement_currencies(organization: &Organization) -> Vec<Currency> {
    organization
        .settlement_currencies
        .iter()
        .filter_map(|s| match Currency::from_id(&s.currency_id) {
            Ok(currency) => Some(currency),
            Err(e) => {
                warn!(
                    organization_id = %organization.id,
                    currency_id = %s.currency_id,
                    error = %e,
                    "skipping malformed settlement currency"
                );
                None
            }
        })
        .collect()
}

fn positive(value: Option<BigDecimal>, field: &str) -> PayOrderResult<BigDecimal> {
    match value {
        Some(v) if v > BigDecimal::from(0) => Ok(v),
        Some(_) => Err(PayOrderError::invalid_request(format!("{} must be positive", field))),
        None => Err(PayOrderError::invalid_request(format!("{} is required", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyMetadata;
    use crate::database::repository::SettlementCurrency;
    use crate::database::{InMemoryOrganizationStore, InMemoryPayOrderStore};
    use crate::services::bridge_exchange::{
        BridgeExchange, Direction, ExchangeCreated, ExchangeError, ExchangeResult,
    };
    use crate::services::price_oracle::{OracleResult, PriceOracle};
    use async_trait::async_trait;
    use serde_json::json;

    /// Knows every currency with 6 decimals; prices are never asked for here
    struct KnowsEverything;

    #[async_trait]
    impl PriceOracle for KnowsEverything {
        async fn get_token_info(&self, currency: &Currency) -> OracleResult<Option<Currency>> {
            Ok(Some(currency.clone().with_metadata(CurrencyMetadata {
                decimals: Some(6),
                ..Default::default()
            })))
        }

        async fn get_prices(&self, _currencies: &[Currency]) -> OracleResult<HashMap<String, BigDecimal>> {
            Ok(HashMap::new())
        }
    }

    struct NoExchange;

    #[async_trait]
    impl BridgeExchange for NoExchange {
        fn name(&self) -> &'static str {
            "NONE"
        }

        async fn is_supported(&self, _currency: &Currency) -> ExchangeResult<bool> {
            Ok(false)
        }

        async fn estimate(
            &self,
            source: &Currency,
            _destination: &Currency,
            _amount: &BigDecimal,
            _direction: Direction,
        ) -> ExchangeResult<BigDecimal> {
            Err(ExchangeError::unsupported_currency(source))
        }

        async fn exchange(
            &self,
            source: &Currency,
            _destination: &Currency,
            _amount: &BigDecimal,
            _payout_address: &str,
            _refund_address: &str,
        ) -> ExchangeResult<ExchangeCreated> {
            Err(ExchangeError::unsupported_currency(source))
        }

        async fn get_status(&self, _exchange_id: &str) -> ExchangeResult<ExchangeStatus> {
            Err(ExchangeError::invalid_response("no exchange"))
        }
    }

    fn usdc() -> Currency {
        Currency::new(ChainId::Base, Some("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913")).unwrap()
    }

    async fn service(settles_in: Vec<SettlementCurrency>) -> (PayOrderService, Uuid) {
        let organizations = Arc::new(InMemoryOrganizationStore::new());
        let organization_id = Uuid::new_v4();
        organizations
            .insert(Organization {
                id: organization_id,
                name: "Acme".to_string(),
                settlement_currencies: settles_in,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;

        let service = PayOrderService::new(
            Arc::new(InMemoryPayOrderStore::new()),
            organizations,
            Arc::new(ChainAggregator::new(Vec::new())),
            Arc::new(QuoteEngine::new(Arc::new(KnowsEverything), Arc::new(NoExchange))),
            PayOrderServiceConfig::default(),
        );
        (service, organization_id)
    }

    fn request(organization_id: Uuid, mode: PayOrderMode) -> CreatePayOrderRequest {
        CreatePayOrderRequest {
            organization_id,
            mode,
            destination_currency: None,
            destination_amount: None,
            destination_value_usd: None,
            destination_receiving_address: None,
            metadata: Some(json!({"items": [{"sku": "tee", "qty": 1}]})),
        }
    }

    fn settlement() -> Vec<SettlementCurrency> {
        vec![SettlementCurrency {
            currency_id: usdc().id().to_string(),
            settlement_address: "0xmerchant".to_string(),
        }]
    }

    #[tokio::test]
    async fn test_create_deposit_stores_raw_amount() {
        let (service, org) = service(Vec::new()).await;
        let mut req = request(org, PayOrderMode::Deposit);
        req.destination_currency = Some(CurrencyRef::Id(usdc().id().to_string()));
        req.destination_amount = Some(BigDecimal::from(25));
        req.destination_receiving_address = Some(" 0xreceiver ".to_string());

        let order = service.create_payorder(req).await.unwrap();
        assert_eq!(order.status, PayOrderStatus::Pending);
        assert_eq!(order.destination_amount, Some(BigDecimal::from(25_000_000)));
        assert_eq!(order.destination_receiving_address.as_deref(), Some("0xreceiver"));
    }

    #[tokio::test]
    async fn test_create_deposit_requires_address() {
        let (service, org) = service(Vec::new()).await;
        let mut req = request(org, PayOrderMode::Deposit);
        req.destination_currency = Some(CurrencyRef::Id(usdc().id().to_string()));
        req.destination_amount = Some(BigDecimal::from(25));

        let err = service.create_payorder(req).await.unwrap_err();
        assert!(matches!(err, PayOrderError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_create_sale_rejects_non_positive_value() {
        let (service, org) = service(settlement()).await;
        let mut req = request(org, PayOrderMode::Sale);
        req.destination_value_usd = Some(BigDecimal::from(0));

        let err = service.create_payorder(req).await.unwrap_err();
        assert!(matches!(err, PayOrderError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_create_sale_without_settlement_currencies() {
        let (service, org) = service(Vec::new()).await;
        let mut req = request(org, PayOrderMode::Sale);
        req.destination_value_usd = Some(BigDecimal::from(100));

        let err = service.create_payorder(req).await.unwrap_err();
        assert!(matches!(err, PayOrderError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_create_sale_pins_settlement_address() {
        let (service, org) = service(settlement()).await;
        let mut req = request(org, PayOrderMode::Sale);
        req.destination_value_usd = Some(BigDecimal::from(100));
        req.destination_currency = Some(CurrencyRef::Id(usdc().id().to_string()));

        let order = service.create_payorder(req).await.unwrap();
        assert_eq!(order.destination_receiving_address.as_deref(), Some("0xmerchant"));
        assert_eq!(order.destination_amount, None);
    }

    #[tokio::test]
    async fn test_create_sale_rejects_foreign_currency() {
        let (service, org) = service(settlement()).await;
        let mut req = request(org, PayOrderMode::Sale);
        req.destination_value_usd = Some(BigDecimal::from(100));
        req.destination_currency = Some(CurrencyRef::Resolved(Currency::native(ChainId::Eth)));

        let err = service.create_payorder(req).await.unwrap_err();
        assert!(matches!(err, PayOrderError::InvalidCurrency { .. }));
    }

    #[tokio::test]
    async fn test_unknown_organization() {
        let (service, _) = service(Vec::new()).await;
        let missing = Uuid::new_v4();
        let err = service
            .create_payorder(request(missing, PayOrderMode::Sale))
            .await
            .unwrap_err();
        assert_eq!(err, PayOrderError::OrganizationNotFound { organization_id: missing });
    }

    #[tokio::test]
    async fn test_expire_is_guarded() {
        let (service, org) = service(settlement()).await;
        let mut req = request(org, PayOrderMode::Sale);
        req.destination_value_usd = Some(BigDecimal::from(100));
        let order = service.create_payorder(req).await.unwrap();

        let expired = service.expire(order.id).await.unwrap();
        assert_eq!(expired.status, PayOrderStatus::Expired);

        let err = service.expire(order.id).await.unwrap_err();
        assert!(matches!(
            err,
            PayOrderError::InvalidState { status: PayOrderStatus::Expired, .. }
        ));
    }

    #[tokio::test]
    async fn test_payment_details_requires_refund_address() {
        let (service, org) = service(settlement()).await;
        let mut req = request(org, PayOrderMode::Sale);
        req.destination_value_usd = Some(BigDecimal::from(100));
        let order = service.create_payorder(req).await.unwrap();

        let err = service
            .payment_details(order.id, CurrencyRef::Resolved(Currency::native(ChainId::Eth)), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, PayOrderError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_order_locks_serialize_one_order() {
        let locks = Arc::new(OrderLocks::default());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        // released entries are pruned on the next acquire
        let _other = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.locks.lock().await.len(), 1);
    }
}
