//! Persistence seams used by the pay order orchestrator
//!
//! Guarded updates take the set of statuses the row must currently be in and
//! return `Ok(None)` when no row matched, leaving the caller to decide whether
//! that is a lost race or a bad request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DatabaseResult;
use crate::services::payorder::model::{NewPayOrder, PayOrder, PayOrderStatus, Reservation};

/// A currency an organization accepts for SALE proceeds, and where to send it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementCurrency {
    pub currency_id: String,
    pub settlement_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub settlement_currencies: Vec<SettlementCurrency>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn settlement_for(&self, currency_id: &str) -> Option<&SettlementCurrency> {
        self.settlement_currencies
            .iter()
            .find(|s| s.currency_id.eq_ignore_ascii_case(currency_id))
    }
}

#[async_trait]
pub trait PayOrderStore: Send + Sync {
    async fn create(&self, order: NewPayOrder) -> DatabaseResult<PayOrder>;

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<PayOrder>>;

    /// Fix the payment terms; only a PENDING order can be reserved
    async fn reserve(&self, id: Uuid, reservation: &Reservation) -> DatabaseResult<Option<PayOrder>>;

    /// Store the payer's transaction hash and move to `to`. A hash already on
    /// the order may not be replaced by a different one.
    async fn record_transfer(
        &self,
        id: Uuid,
        tx_hash: &str,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
    ) -> DatabaseResult<Option<PayOrder>>;

    async fn update_status(
        &self,
        id: Uuid,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
    ) -> DatabaseResult<Option<PayOrder>>;

    /// Oldest-checked first
    async fn find_awaiting_confirmation(&self, limit: i64) -> DatabaseResult<Vec<PayOrder>>;

    /// PENDING or AWAITING_PAYMENT orders whose reservation lapsed before `now`
    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DatabaseResult<Vec<PayOrder>>;

    async fn record_confirmation_attempt(&self, id: Uuid) -> DatabaseResult<Option<PayOrder>>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Organization>>;
}
