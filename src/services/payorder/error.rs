use thiserror::Error;
use uuid::Uuid;

use super::model::PayOrderStatus;
use crate::chains::ChainError;
use crate::currency::CurrencyError;
use crate::database::error::DatabaseError;
use crate::services::bridge_exchange::ExchangeError;
use crate::services::price_oracle::OracleError;
use crate::services::quote::QuoteError;

pub type PayOrderResult<T> = Result<T, PayOrderError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayOrderError {
    #[error("Invalid pay order request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid currency {currency_id}: {reason}")]
    InvalidCurrency { currency_id: String, reason: String },

    #[error("Pay order {payorder_id} not found")]
    NotFound { payorder_id: Uuid },

    #[error("Organization {organization_id} not found")]
    OrganizationNotFound { organization_id: Uuid },

    #[error("Pay order {payorder_id} is {status}, cannot {operation}")]
    InvalidState {
        payorder_id: Uuid,
        status: PayOrderStatus,
        operation: &'static str,
    },

    #[error("Payment for pay order {payorder_id} failed verification: {reason}")]
    VerificationFailed { payorder_id: Uuid, reason: String },

    #[error("Transaction {tx_hash} for pay order {payorder_id} is not confirmed yet")]
    Unconfirmed { payorder_id: Uuid, tx_hash: String },

    #[error("Pay order operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Currency(#[from] CurrencyError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl PayOrderError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn invalid_currency(currency_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCurrency {
            currency_id: currency_id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(payorder_id: Uuid, status: PayOrderStatus, operation: &'static str) -> Self {
        Self::InvalidState {
            payorder_id,
            status,
            operation,
        }
    }

    pub fn verification_failed(payorder_id: Uuid, reason: impl ToString) -> Self {
        Self::VerificationFailed {
            payorder_id,
            reason: reason.to_string(),
        }
    }
}
