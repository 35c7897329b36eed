use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::PayOrderError;

/// Lifecycle of a pay order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayOrderStatus {
    Pending,
    AwaitingPayment,
    Received,
    AwaitingConfirmation,
    ExecutingOrder,
    Completed,
    Failed,
    Expired,
}

impl PayOrderStatus {
    pub const ALL: [PayOrderStatus; 8] = [
        PayOrderStatus::Pending,
        PayOrderStatus::AwaitingPayment,
        PayOrderStatus::Received,
        PayOrderStatus::AwaitingConfirmation,
        PayOrderStatus::ExecutingOrder,
        PayOrderStatus::Completed,
        PayOrderStatus::Failed,
        PayOrderStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayOrderStatus::Pending => "PENDING",
            PayOrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            PayOrderStatus::Received => "RECEIVED",
            PayOrderStatus::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            PayOrderStatus::ExecutingOrder => "EXECUTING_ORDER",
            PayOrderStatus::Completed => "COMPLETED",
            PayOrderStatus::Failed => "FAILED",
            PayOrderStatus::Expired => "EXPIRED",
        }
    }

    /// States reachable in one step
    pub fn valid_transitions(&self) -> &'static [PayOrderStatus] {
        use PayOrderStatus::*;
        match self {
            Pending => &[AwaitingPayment, Expired],
            AwaitingPayment => &[Received, AwaitingConfirmation, Failed, Expired],
            AwaitingConfirmation => &[Received, AwaitingConfirmation, Failed, Expired],
            Received => &[ExecutingOrder],
            ExecutingOrder => &[Completed, Failed],
            Completed | Failed | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: PayOrderStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PayOrderStatus::Completed | PayOrderStatus::Failed | PayOrderStatus::Expired
        )
    }
}

impl fmt::Display for PayOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayOrderStatus {
    type Err = PayOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayOrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PayOrderError::invalid_request(format!("unknown status '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayOrderMode {
    /// Merchant wants a USD value settled into one of its settlement currencies
    Sale,
    /// Payer delivers a fixed amount of a chosen currency to a chosen address
    Deposit,
}

impl PayOrderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayOrderMode::Sale => "SALE",
            PayOrderMode::Deposit => "DEPOSIT",
        }
    }
}

impl fmt::Display for PayOrderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayOrderMode {
    type Err = PayOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SALE" => Ok(PayOrderMode::Sale),
            "DEPOSIT" => Ok(PayOrderMode::Deposit),
            other => Err(PayOrderError::invalid_request(format!("unknown mode '{}'", other))),
        }
    }
}

/// Pay order as persisted. Amounts are raw units of their currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayOrder {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub mode: PayOrderMode,
    pub status: PayOrderStatus,

    pub destination_currency_id: Option<String>,
    pub destination_amount: Option<BigDecimal>,
    pub destination_value_usd: Option<BigDecimal>,
    pub destination_receiving_address: Option<String>,

    pub source_currency_id: Option<String>,
    pub source_amount: Option<BigDecimal>,
    pub source_deposit_address: Option<String>,
    pub refund_address: Option<String>,

    pub routing_service: Option<String>,
    pub routing_reference: Option<String>,
    pub source_transaction_hash: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
    pub confirmation_attempts: i32,
    pub last_confirmation_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayOrder {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Fields fixed at creation
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayOrder {
    pub organization_id: Uuid,
    pub mode: PayOrderMode,
    pub destination_currency_id: Option<String>,
    pub destination_amount: Option<BigDecimal>,
    pub destination_value_usd: Option<BigDecimal>,
    pub destination_receiving_address: Option<String>,
    pub metadata: JsonValue,
}

/// Terms fixed by `payment_details`. Destination fields only fill gaps left
/// at creation (an open SALE picks its settlement currency here).
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub source_currency_id: String,
    pub source_amount: BigDecimal,
    pub source_deposit_address: String,
    pub refund_address: String,
    pub destination_currency_id: String,
    pub destination_amount: BigDecimal,
    pub destination_receiving_address: String,
    pub routing_service: String,
    pub routing_reference: String,
    pub expires_at: DateTime<Utc>,
}
