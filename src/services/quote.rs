//! Quote aggregation engine
//!
//! Answers "what must the payer send" by pricing every input through the
//! oracle and asking the bridging exchange for REVERSE estimates. Candidates
//! that fail to price or estimate are dropped with a warning; the call only
//! fails when no input can be priced or no quote survives.

use bigdecimal::BigDecimal;
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::bridge_exchange::{BridgeExchange, Direction, ExchangeError};
use super::price_oracle::{OracleError, PriceOracle};
use crate::currency::{Currency, CurrencyAmount, CurrencyError, CurrencyToCurrencyQuote};

pub type QuoteResult<T> = Result<T, QuoteError>;

pub const DEFAULT_QUOTE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("No price available for {}", .currency_ids.join(", "))]
    PriceUnavailable { currency_ids: Vec<String> },

    #[error("No viable quote for the requested currencies")]
    NoViableQuote,

    #[error("Price oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Currency error: {0}")]
    Currency(#[from] CurrencyError),
}

impl QuoteError {
    fn price_unavailable(currencies: &[Currency]) -> Self {
        Self::PriceUnavailable {
            currency_ids: currencies.iter().map(|c| c.id().to_string()).collect(),
        }
    }
}

/// Ordering used for "best of" selection: lowest source USD cost first, then
/// source id, then destination id
pub fn compare_quotes(a: &CurrencyToCurrencyQuote, b: &CurrencyToCurrencyQuote) -> Ordering {
    let by_cost = match (&a.source.value_usd, &b.source.value_usd) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_cost
        .then_with(|| a.source.currency.id().cmp(b.source.currency.id()))
        .then_with(|| a.destination.currency.id().cmp(b.destination.currency.id()))
}

pub fn best_quote<I>(quotes: I) -> Option<CurrencyToCurrencyQuote>
where
    I: IntoIterator<Item = CurrencyToCurrencyQuote>,
{
    quotes.into_iter().min_by(compare_quotes)
}

pub struct QuoteEngine {
    oracle: Arc<dyn PriceOracle>,
    exchange: Arc<dyn BridgeExchange>,
    concurrency: usize,
}

impl QuoteEngine {
    pub fn new(oracle: Arc<dyn PriceOracle>, exchange: Arc<dyn BridgeExchange>) -> Self {
        Self {
            oracle,
            exchange,
            concurrency: DEFAULT_QUOTE_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn oracle(&self) -> &Arc<dyn PriceOracle> {
        &self.oracle
    }

    pub fn exchange(&self) -> &Arc<dyn BridgeExchange> {
        &self.exchange
    }

    /// Attach oracle metadata and USD prices, preserving input order.
    ///
    /// Duplicates collapse to one entry. Currencies the oracle does not know
    /// or cannot price are left out; a rate-limited oracle fails the call.
    pub async fn resolve(&self, currencies: &[Currency]) -> QuoteResult<Vec<Currency>> {
        let mut seen = HashSet::new();
        let unique: Vec<&Currency> = currencies.iter().filter(|c| seen.insert(c.id())).collect();

        let infos: Vec<Result<Option<Currency>, OracleError>> = stream::iter(unique)
            .map(|currency| async move {
                match self.oracle.get_token_info(currency).await {
                    Ok(Some(info)) => Ok(Some(info)),
                    Ok(None) => {
                        warn!(currency_id = %currency, "currency unknown to price oracle, dropping");
                        Ok(None)
                    }
                    Err(OracleError::RateLimited) => Err(OracleError::RateLimited),
                    Err(e) => {
                        warn!(currency_id = %currency, error = %e, "token info lookup failed, dropping");
                        Ok(None)
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;
        // an exhausted provider is reported as such, not as missing prices
        let resolved: Vec<Currency> = infos
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        if resolved.is_empty() {
            return Ok(Vec::new());
        }

        let prices = self.oracle.get_prices(&resolved).await?;
        Ok(resolved
            .into_iter()
            .filter_map(|currency| match prices.get(currency.id()) {
                Some(price) if *price > BigDecimal::from(0) => Some(currency.with_price(price.clone())),
                _ => {
                    warn!(currency_id = %currency, "no usable price, dropping");
                    None
                }
            })
            .collect())
    }

    /// Currencies the bridging exchange can route, in input order
    pub async fn supported_by_exchange(&self, currencies: Vec<Currency>) -> Vec<Currency> {
        let checked: Vec<Option<Currency>> = stream::iter(currencies)
            .map(|currency| async move {
                match self.exchange.is_supported(&currency).await {
                    Ok(true) => Some(currency),
                    Ok(false) => {
                        debug!(currency_id = %currency, "currency not routable by exchange");
                        None
                    }
                    Err(e) => {
                        warn!(currency_id = %currency, error = %e, "exchange support check failed, dropping");
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;
        checked.into_iter().flatten().collect()
    }

    /// Cheapest route per source currency for a USD target, choosing among
    /// `destinations`. Results are ordered cheapest first.
    pub async fn quote_usd(
        &self,
        sources: &[Currency],
        destinations: &[Currency],
        destination_value_usd: &BigDecimal,
    ) -> QuoteResult<Vec<CurrencyToCurrencyQuote>> {
        let all: Vec<Currency> = sources.iter().chain(destinations).cloned().collect();
        let priced = index_by_id(self.resolve(&all).await?);

        let sources = pick(&priced, sources);
        if sources.is_empty() {
            return Err(QuoteError::price_unavailable(&all));
        }
        let targets: Vec<CurrencyAmount> = pick(&priced, destinations)
            .into_iter()
            .filter_map(|destination| {
                let id = destination.id().to_string();
                match CurrencyAmount::from_usd(destination, destination_value_usd.clone()) {
                    Ok(amount) => Some(amount),
                    Err(e) => {
                        warn!(currency_id = %id, error = %e, "cannot size destination, dropping");
                        None
                    }
                }
            })
            .collect();
        if targets.is_empty() {
            return Err(QuoteError::price_unavailable(destinations));
        }

        let targets = &targets;
        let quotes: Vec<CurrencyToCurrencyQuote> = stream::iter(sources)
            .map(|source| async move { self.best_for_source(source, targets).await })
            .buffer_unordered(self.concurrency)
            .filter_map(|best| async move { best })
            .collect()
            .await;

        finish(quotes)
    }

    /// One quote per source currency for a fixed destination amount (UI units)
    pub async fn quote(
        &self,
        sources: &[Currency],
        destination: &Currency,
        destination_amount: &BigDecimal,
    ) -> QuoteResult<Vec<CurrencyToCurrencyQuote>> {
        let mut all: Vec<Currency> = sources.to_vec();
        all.push(destination.clone());
        let priced = index_by_id(self.resolve(&all).await?);

        let destination = priced
            .get(destination.id())
            .cloned()
            .ok_or_else(|| QuoteError::price_unavailable(std::slice::from_ref(destination)))?;
        let sources = pick(&priced, sources);
        if sources.is_empty() {
            return Err(QuoteError::price_unavailable(&all));
        }

        let target = CurrencyAmount::from_ui(destination, destination_amount.clone())?;
        let target = &target;
        let quotes: Vec<CurrencyToCurrencyQuote> = stream::iter(sources)
            .map(|source| async move {
                let source_id = source.id().to_string();
                match self.estimate(source, target).await {
                    Ok(quote) => Some(quote),
                    Err(e) => {
                        warn!(
                            source_id = %source_id,
                            destination_id = %target.currency,
                            error = %e,
                            "estimate failed, dropping source"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|quote| async move { quote })
            .collect()
            .await;

        finish(quotes)
    }

    async fn best_for_source(
        &self,
        source: Currency,
        targets: &[CurrencyAmount],
    ) -> Option<CurrencyToCurrencyQuote> {
        let source = &source;
        let candidates: Vec<CurrencyToCurrencyQuote> = stream::iter(targets)
            .map(|target| async move {
                match self.estimate(source.clone(), target).await {
                    Ok(quote) => Some(quote),
                    Err(e) => {
                        warn!(
                            source_id = %source,
                            destination_id = %target.currency,
                            error = %e,
                            "estimate failed, dropping candidate"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|quote| async move { quote })
            .collect()
            .await;

        if candidates.is_empty() {
            warn!(source_id = %source, "no destination could be quoted, dropping source");
        }
        best_quote(candidates)
    }

    async fn estimate(
        &self,
        source: Currency,
        target: &CurrencyAmount,
    ) -> QuoteResult<CurrencyToCurrencyQuote> {
        let source_ui = self
            .exchange
            .estimate(&source, &target.currency, &target.ui_amount, Direction::Reverse)
            .await?;
        let source_ui = source_ui.round(source.decimals()? as i64);

        Ok(CurrencyToCurrencyQuote {
            source: CurrencyAmount::from_ui(source, source_ui)?,
            destination: target.clone(),
        })
    }
}

fn index_by_id(currencies: Vec<Currency>) -> HashMap<String, Currency> {
    currencies
        .into_iter()
        .map(|c| (c.id().to_string(), c))
        .collect()
}

/// Resolved counterparts of `wanted`, in order, without duplicates
fn pick(priced: &HashMap<String, Currency>, wanted: &[Currency]) -> Vec<Currency> {
    let mut seen = HashSet::new();
    wanted
        .iter()
        .filter(|c| seen.insert(c.id()))
        .filter_map(|c| priced.get(c.id()).cloned())
        .collect()
}

fn finish(mut quotes: Vec<CurrencyToCurrencyQuote>) -> QuoteResult<Vec<CurrencyToCurrencyQuote>> {
    if quotes.is_empty() {
        return Err(QuoteError::NoViableQuote);
    }
    quotes.sort_by(compare_quotes);
    Ok(quotes)
}
