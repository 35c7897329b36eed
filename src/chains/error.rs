use thiserror::Error;

use crate::currency::CurrencyError;
use crate::services::http_client::HttpError;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Timeout error: operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Rate limit exceeded. Please try again later")]
    RateLimited,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction not found: {tx_hash}")]
    TransactionNotFound { tx_hash: String },

    #[error("No transfer found in transaction {tx_hash}")]
    NoTransferFound { tx_hash: String },

    #[error("Transaction {tx_hash} failed: {reason}")]
    TransactionFailed { tx_hash: String, reason: String },

    #[error("Transaction {tx_hash} is a double spend")]
    DoubleSpend { tx_hash: String },

    #[error("Unsupported chain: {chain}")]
    UnsupportedChain { chain: String },

    #[error("Invalid chain response: {message}")]
    InvalidResponse { message: String },
}

impl ChainError {
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn rpc_error(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    pub fn no_transfer_found(tx_hash: impl Into<String>) -> Self {
        Self::NoTransferFound {
            tx_hash: tx_hash.into(),
        }
    }

    pub fn transaction_failed(tx_hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransactionFailed {
            tx_hash: tx_hash.into(),
            reason: reason.into(),
        }
    }

    pub fn double_spend(tx_hash: impl Into<String>) -> Self {
        Self::DoubleSpend {
            tx_hash: tx_hash.into(),
        }
    }

    pub fn unsupported_chain(chain: impl ToString) -> Self {
        Self::UnsupportedChain {
            chain: chain.to_string(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Transient failures worth another attempt later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Network { .. }
                | ChainError::Timeout { .. }
                | ChainError::RateLimited
                | ChainError::Rpc { .. }
                | ChainError::TransactionNotFound { .. }
        )
    }
}

impl From<HttpError> for ChainError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::RateLimited { .. } => ChainError::RateLimited,
            HttpError::Timeout { seconds, .. } => ChainError::Timeout { seconds },
            HttpError::Decode { message, .. } => ChainError::InvalidResponse { message },
            other => ChainError::network_error(other.to_string()),
        }
    }
}

impl From<CurrencyError> for ChainError {
    fn from(err: CurrencyError) -> Self {
        ChainError::invalid_response(err.to_string())
    }
}
