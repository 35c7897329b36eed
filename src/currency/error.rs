use thiserror::Error;

pub type CurrencyResult<T> = Result<T, CurrencyError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Invalid currency identifier: {id}")]
    InvalidIdentifier { id: String },

    #[error("Invalid currency address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Price unavailable for currency {currency_id}")]
    PriceUnavailable { currency_id: String },

    #[error("Decimals unavailable for currency {currency_id}")]
    DecimalsUnavailable { currency_id: String },

    #[error("Invalid amount '{amount}': {reason}")]
    InvalidAmount { amount: String, reason: String },
}

impl CurrencyError {
    pub fn invalid_identifier(id: impl Into<String>) -> Self {
        Self::InvalidIdentifier { id: id.into() }
    }

    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn price_unavailable(currency_id: impl Into<String>) -> Self {
        Self::PriceUnavailable {
            currency_id: currency_id.into(),
        }
    }

    pub fn decimals_unavailable(currency_id: impl Into<String>) -> Self {
        Self::DecimalsUnavailable {
            currency_id: currency_id.into(),
        }
    }

    pub fn invalid_amount(amount: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            amount: amount.into(),
            reason: reason.into(),
        }
    }
}
