//! Application-level error type
//!
//! Module errors (`CurrencyError`, `ChainError`, `PayOrderError`, ...) stay
//! precise; `AppError` folds them into a layered taxonomy with an HTTP status,
//! a stable error code and a message safe to show to a payer or merchant.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::CacheError;
use crate::chains::ChainError;
use crate::config::ConfigError;
use crate::currency::CurrencyError;
use crate::services::{
    ExchangeError, HttpError, OracleError, PayOrderError, QuoteError,
};

/// Stable codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "PRICE_UNAVAILABLE")]
    PriceUnavailable,
    #[serde(rename = "UNSUPPORTED_CURRENCY")]
    UnsupportedCurrency,
    #[serde(rename = "NO_VIABLE_QUOTE")]
    NoViableQuote,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "VERIFICATION_FAILED")]
    VerificationFailed,
    #[serde(rename = "PAYMENT_UNCONFIRMED")]
    PaymentUnconfirmed,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (429, 502, 504)
    #[serde(rename = "BLOCKCHAIN_ERROR")]
    BlockchainError,
    #[serde(rename = "PRICE_ORACLE_ERROR")]
    PriceOracleError,
    #[serde(rename = "EXCHANGE_ERROR")]
    ExchangeError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Validation (400)
    #[serde(rename = "INVALID_CURRENCY")]
    InvalidCurrency,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    NotFound { entity: String, id: String },
    /// No USD price for the listed currencies
    PriceUnavailable { currency_ids: String },
    /// The bridging exchange (or our registry) cannot route this currency
    UnsupportedCurrency { currency_id: String, reason: String },
    NoViableQuote,
    /// Operation not allowed in the pay order's current status
    InvalidState {
        payorder_id: String,
        status: String,
        operation: String,
    },
    /// The payer's transfer does not match the reserved terms
    VerificationFailed { payorder_id: String, reason: String },
    /// Transfer seen but not final yet; ask again later
    Unconfirmed { payorder_id: String, tx_hash: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
}

/// Upstream failures. `message` is for logs only.
#[derive(Debug, Clone)]
pub enum ExternalError {
    Blockchain { message: String, is_retryable: bool },
    PriceOracle { message: String, is_retryable: bool },
    Exchange { message: String, is_retryable: bool },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    InvalidRequest { message: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => 404,
                DomainError::PriceUnavailable { .. } => 422,
                DomainError::UnsupportedCurrency { .. } => 422,
                DomainError::NoViableQuote => 422,
                DomainError::InvalidState { .. } => 409, // Conflict
                DomainError::VerificationFailed { .. } => 422,
                DomainError::Unconfirmed { .. } => 202, // Accepted
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Blockchain { .. }
                | ExternalError::PriceOracle { .. }
                | ExternalError::Exchange { .. } => 502, // Bad Gateway
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::PriceUnavailable { .. } => ErrorCode::PriceUnavailable,
                DomainError::UnsupportedCurrency { .. } => ErrorCode::UnsupportedCurrency,
                DomainError::NoViableQuote => ErrorCode::NoViableQuote,
                DomainError::InvalidState { .. } => ErrorCode::InvalidState,
                DomainError::VerificationFailed { .. } => ErrorCode::VerificationFailed,
                DomainError::Unconfirmed { .. } => ErrorCode::PaymentUnconfirmed,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Blockchain { .. } => ErrorCode::BlockchainError,
                ExternalError::PriceOracle { .. } => ErrorCode::PriceOracleError,
                ExternalError::Exchange { .. } => ErrorCode::ExchangeError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { .. } => ErrorCode::InvalidCurrency,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::InvalidRequest { .. } => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
                DomainError::PriceUnavailable { currency_ids } => {
                    format!("No USD price available for {}", currency_ids)
                }
                DomainError::UnsupportedCurrency {
                    currency_id,
                    reason,
                } => format!("Currency '{}' is not supported: {}", currency_id, reason),
                DomainError::NoViableQuote => {
                    "No route is available for the requested currencies".to_string()
                }
                DomainError::InvalidState {
                    payorder_id,
                    status,
                    operation,
                } => format!(
                    "Pay order '{}' is {} and cannot {}",
                    payorder_id, status, operation
                ),
                DomainError::VerificationFailed {
                    payorder_id,
                    reason,
                } => format!(
                    "Payment for pay order '{}' could not be verified: {}",
                    payorder_id, reason
                ),
                DomainError::Unconfirmed { tx_hash, .. } => format!(
                    "Transaction '{}' is not confirmed yet. Please check again shortly",
                    tx_hash
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Blockchain { is_retryable, .. } => {
                    if *is_retryable {
                        "Blockchain network is busy. Please try again in a moment".to_string()
                    } else {
                        "Blockchain lookup failed. Please contact support".to_string()
                    }
                }
                ExternalError::PriceOracle { .. } => {
                    "Pricing is temporarily unavailable. Please try again".to_string()
                }
                ExternalError::Exchange { is_retryable, .. } => {
                    if *is_retryable {
                        "The exchange is temporarily unavailable. Please try again".to_string()
                    } else {
                        "The exchange could not process this request".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidRequest { message } => message.clone(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::Unconfirmed { .. }),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Blockchain { is_retryable, .. }
                | ExternalError::PriceOracle { is_retryable, .. }
                | ExternalError::Exchange { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs

/// Shared mapping for failures of one upstream HTTP service
fn http_kind(service: &str, err: HttpError, external: fn(String, bool) -> ExternalError) -> AppErrorKind {
    match err {
        HttpError::RateLimited { .. } => AppErrorKind::External(ExternalError::RateLimit {
            service: service.to_string(),
            retry_after: None,
        }),
        HttpError::Timeout { seconds, .. } => AppErrorKind::External(ExternalError::Timeout {
            service: service.to_string(),
            timeout_secs: seconds,
        }),
        other => {
            let retryable = other.is_retryable();
            AppErrorKind::External(external(other.to_string(), retryable))
        }
    }
}

fn oracle_external(message: String, is_retryable: bool) -> ExternalError {
    ExternalError::PriceOracle {
        message,
        is_retryable,
    }
}

fn exchange_external(message: String, is_retryable: bool) -> ExternalError {
    ExternalError::Exchange {
        message,
        is_retryable,
    }
}

impl From<CurrencyError> for AppError {
    fn from(err: CurrencyError) -> Self {
        let kind = match err {
            CurrencyError::InvalidIdentifier { id } => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency: id,
                    reason: "Malformed currency identifier".to_string(),
                })
            }
            CurrencyError::InvalidAddress { address, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency: address,
                    reason,
                })
            }
            CurrencyError::PriceUnavailable { currency_id } => {
                AppErrorKind::Domain(DomainError::PriceUnavailable {
                    currency_ids: currency_id,
                })
            }
            CurrencyError::DecimalsUnavailable { currency_id } => {
                AppErrorKind::Domain(DomainError::UnsupportedCurrency {
                    currency_id,
                    reason: "token decimals are unknown".to_string(),
                })
            }
            CurrencyError::InvalidAmount { amount, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount { amount, reason })
            }
        };
        AppError::new(kind)
    }
}

impl From<ChainError> for AppError {
    fn from(err: ChainError) -> Self {
        let kind = match err {
            ChainError::RateLimited => AppErrorKind::External(ExternalError::RateLimit {
                service: "Blockchain RPC".to_string(),
                retry_after: None,
            }),
            ChainError::Timeout { seconds } => AppErrorKind::External(ExternalError::Timeout {
                service: "Blockchain RPC".to_string(),
                timeout_secs: seconds,
            }),
            ChainError::UnsupportedChain { chain } => {
                AppErrorKind::Domain(DomainError::UnsupportedCurrency {
                    currency_id: chain,
                    reason: "chain is not supported".to_string(),
                })
            }
            other => {
                let is_retryable = other.is_retryable();
                AppErrorKind::External(ExternalError::Blockchain {
                    message: other.to_string(),
                    is_retryable,
                })
            }
        };
        AppError::new(kind)
    }
}

impl From<OracleError> for AppError {
    fn from(err: OracleError) -> Self {
        let kind = match err {
            OracleError::RateLimited => AppErrorKind::External(ExternalError::RateLimit {
                service: "CoinGecko".to_string(),
                retry_after: None,
            }),
            OracleError::Http(e) => http_kind("CoinGecko", e, oracle_external),
            OracleError::InvalidResponse { message } => {
                AppErrorKind::External(oracle_external(message, false))
            }
        };
        AppError::new(kind)
    }
}

impl From<ExchangeError> for AppError {
    fn from(err: ExchangeError) -> Self {
        let kind = match err {
            ExchangeError::UnsupportedNetwork { currency_id } => {
                AppErrorKind::Domain(DomainError::UnsupportedCurrency {
                    currency_id,
                    reason: "network is not supported by the exchange".to_string(),
                })
            }
            ExchangeError::UnsupportedCurrency { currency_id } => {
                AppErrorKind::Domain(DomainError::UnsupportedCurrency {
                    currency_id,
                    reason: "not listed on the exchange".to_string(),
                })
            }
            ExchangeError::RateLimited => AppErrorKind::External(ExternalError::RateLimit {
                service: "ChangeNow".to_string(),
                retry_after: None,
            }),
            ExchangeError::Http(e) => http_kind("ChangeNow", e, exchange_external),
            ExchangeError::InvalidResponse { message } => {
                AppErrorKind::External(exchange_external(message, false))
            }
        };
        AppError::new(kind)
    }
}

impl From<QuoteError> for AppError {
    fn from(err: QuoteError) -> Self {
        match err {
            QuoteError::PriceUnavailable { currency_ids } => {
                AppError::new(AppErrorKind::Domain(DomainError::PriceUnavailable {
                    currency_ids: currency_ids.join(", "),
                }))
            }
            QuoteError::NoViableQuote => AppError::new(AppErrorKind::Domain(DomainError::NoViableQuote)),
            QuoteError::Oracle(e) => e.into(),
            QuoteError::Exchange(e) => e.into(),
            QuoteError::Currency(e) => e.into(),
        }
    }
}

impl From<PayOrderError> for AppError {
    fn from(err: PayOrderError) -> Self {
        let kind = match err {
            PayOrderError::InvalidRequest { message } => {
                AppErrorKind::Validation(ValidationError::InvalidRequest { message })
            }
            PayOrderError::InvalidCurrency {
                currency_id,
                reason,
            } => AppErrorKind::Validation(ValidationError::InvalidCurrency {
                currency: currency_id,
                reason,
            }),
            PayOrderError::NotFound { payorder_id } => AppErrorKind::Domain(DomainError::NotFound {
                entity: "Pay order".to_string(),
                id: payorder_id.to_string(),
            }),
            PayOrderError::OrganizationNotFound { organization_id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: "Organization".to_string(),
                    id: organization_id.to_string(),
                })
            }
            PayOrderError::InvalidState {
                payorder_id,
                status,
                operation,
            } => AppErrorKind::Domain(DomainError::InvalidState {
                payorder_id: payorder_id.to_string(),
                status: status.to_string(),
                operation: operation.to_string(),
            }),
            PayOrderError::VerificationFailed {
                payorder_id,
                reason,
            } => AppErrorKind::Domain(DomainError::VerificationFailed {
                payorder_id: payorder_id.to_string(),
                reason,
            }),
            PayOrderError::Unconfirmed {
                payorder_id,
                tx_hash,
            } => AppErrorKind::Domain(DomainError::Unconfirmed {
                payorder_id: payorder_id.to_string(),
                tx_hash,
            }),
            PayOrderError::Timeout { seconds } => AppErrorKind::External(ExternalError::Timeout {
                service: "Quote".to_string(),
                timeout_secs: seconds,
            }),
            PayOrderError::Chain(e) => return e.into(),
            PayOrderError::Quote(e) => return e.into(),
            PayOrderError::Exchange(e) => return e.into(),
            PayOrderError::Oracle(e) => return e.into(),
            PayOrderError::Currency(e) => return e.into(),
            PayOrderError::Database(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Cache {
            message: err.to_string(),
        }))
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::PayOrderStatus;
    use uuid::Uuid;

    #[test]
    fn test_invalid_state_is_conflict() {
        let error: AppError = PayOrderError::invalid_state(
            Uuid::new_v4(),
            PayOrderStatus::AwaitingPayment,
            "reserve payment details",
        )
        .into();

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::InvalidState);
        assert!(error.user_message().contains("AWAITING_PAYMENT"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_unconfirmed_is_accepted_and_retryable() {
        let error: AppError = PayOrderError::Unconfirmed {
            payorder_id: Uuid::new_v4(),
            tx_hash: "0xabc".to_string(),
        }
        .into();

        assert_eq!(error.status_code(), 202);
        assert_eq!(error.error_code(), ErrorCode::PaymentUnconfirmed);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_rate_limit_error() {
        let error: AppError = OracleError::RateLimited.into();

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.user_message().contains("CoinGecko"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_unsupported_currency_through_quote() {
        let error: AppError = QuoteError::PriceUnavailable {
            currency_ids: vec!["1".to_string(), "8453".to_string()],
        }
        .into();

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::PriceUnavailable);
        assert!(error.user_message().contains("1, 8453"));
    }

    #[test]
    fn test_upstream_body_is_not_shown() {
        let error: AppError = ExchangeError::invalid_response("<html>stack trace</html>").into();

        assert_eq!(error.status_code(), 502);
        assert!(!error.user_message().contains("stack trace"));
    }

    #[test]
    fn test_validation_error() {
        let error: AppError = CurrencyError::invalid_identifier("eth:usdc").into();

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidCurrency);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_quote_timeout() {
        let error: AppError = PayOrderError::Timeout { seconds: 30 }.into();

        assert_eq!(error.status_code(), 504);
        assert!(error.is_retryable());
    }
}
