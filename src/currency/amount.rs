use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::error::{CurrencyError, CurrencyResult};
use super::identity::Currency;

/// Lower bound on the number of fractional digits shown for a UI amount
pub const DEFAULT_MIN_DISPLAY_PRECISION: u32 = 2;

/// `10^n` as an exact decimal
pub fn pow10(n: u32) -> BigDecimal {
    BigDecimal::new(BigInt::from(1), -(n as i64))
}

/// `round(ui * 10^decimals)`, scale 0
pub fn ui_to_raw(ui_amount: &BigDecimal, decimals: u32) -> BigDecimal {
    (ui_amount * pow10(decimals)).round(0).with_scale(0)
}

/// `raw / 10^decimals`, exact
pub fn raw_to_ui(raw_amount: &BigDecimal, decimals: u32) -> BigDecimal {
    let (digits, scale) = raw_amount.with_scale(0).into_bigint_and_exponent();
    BigDecimal::new(digits, scale + decimals as i64)
}

/// Smallest precision in `[DEFAULT_MIN_DISPLAY_PRECISION, decimals]` whose last
/// digit is worth at most one cent. Without a price the full precision is used.
pub fn display_precision(decimals: u32, price_usd: Option<&BigDecimal>) -> u32 {
    if decimals <= DEFAULT_MIN_DISPLAY_PRECISION {
        return decimals;
    }
    let price = match price_usd {
        Some(price) if *price > BigDecimal::from(0) => price,
        _ => return decimals,
    };

    let one_cent = BigDecimal::new(BigInt::from(1), 2);
    (DEFAULT_MIN_DISPLAY_PRECISION..=decimals)
        .find(|&precision| price * BigDecimal::new(BigInt::from(1), precision as i64) <= one_cent)
        .unwrap_or(decimals)
}

/// An amount of a currency in raw units, UI units and (when priced) USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    pub currency: Currency,
    pub ui_amount: BigDecimal,
    pub raw_amount: BigDecimal,
    pub value_usd: Option<BigDecimal>,
    pub display_precision: u32,
}

impl CurrencyAmount {
    pub fn from_ui(currency: Currency, ui_amount: BigDecimal) -> CurrencyResult<Self> {
        ensure_non_negative(&ui_amount)?;
        let raw_amount = currency.ui_to_raw(&ui_amount)?;
        Ok(Self::build(currency, ui_amount, raw_amount))
    }

    pub fn from_raw(currency: Currency, raw_amount: BigDecimal) -> CurrencyResult<Self> {
        ensure_non_negative(&raw_amount)?;
        let raw_amount = raw_amount.with_scale(0);
        let ui_amount = currency.raw_to_ui(&raw_amount)?;
        Ok(Self::build(currency, ui_amount, raw_amount))
    }

    pub fn from_usd(currency: Currency, value_usd: BigDecimal) -> CurrencyResult<Self> {
        ensure_non_negative(&value_usd)?;
        let ui_amount = currency.usd_to_ui(&value_usd)?;
        let raw_amount = currency.ui_to_raw(&ui_amount)?;
        let mut amount = Self::build(currency, ui_amount, raw_amount);
        amount.value_usd = Some(value_usd);
        Ok(amount)
    }

    fn build(currency: Currency, ui_amount: BigDecimal, raw_amount: BigDecimal) -> Self {
        let value_usd = currency.price_usd().map(|price| &ui_amount * price);
        let display_precision = currency.display_precision();
        Self {
            currency,
            ui_amount,
            raw_amount,
            value_usd,
            display_precision,
        }
    }

    /// UI amount rounded to its display precision
    pub fn display_amount(&self) -> BigDecimal {
        self.ui_amount.round(self.display_precision as i64)
    }

    pub fn is_zero(&self) -> bool {
        self.raw_amount == BigDecimal::from(0)
    }
}

fn ensure_non_negative(amount: &BigDecimal) -> CurrencyResult<()> {
    if *amount < BigDecimal::from(0) {
        return Err(CurrencyError::invalid_amount(
            amount.to_string(),
            "amount must not be negative",
        ));
    }
    Ok(())
}

/// Outcome of a quote: what the payer sends and what the destination receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyToCurrencyQuote {
    pub source: CurrencyAmount,
    pub destination: CurrencyAmount,
}
