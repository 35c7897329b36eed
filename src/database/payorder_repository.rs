use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::database::repository::PayOrderStore;
use crate::services::payorder::model::{
    NewPayOrder, PayOrder, PayOrderMode, PayOrderStatus, Reservation,
};

const COLUMNS: &str = "id, organization_id, mode, status, \
     destination_currency_id, destination_amount, destination_value_usd, destination_receiving_address, \
     source_currency_id, source_amount, source_deposit_address, refund_address, \
     routing_service, routing_reference, source_transaction_hash, \
     expires_at, metadata, confirmation_attempts, last_confirmation_check_at, created_at, updated_at";

/// Row of the `payorders` table; status and mode are stored as text
#[derive(Debug, Clone, FromRow)]
struct PayOrderRow {
    id: Uuid,
    organization_id: Uuid,
    mode: String,
    status: String,
    destination_currency_id: Option<String>,
    destination_amount: Option<BigDecimal>,
    destination_value_usd: Option<BigDecimal>,
    destination_receiving_address: Option<String>,
    source_currency_id: Option<String>,
    source_amount: Option<BigDecimal>,
    source_deposit_address: Option<String>,
    refund_address: Option<String>,
    routing_service: Option<String>,
    routing_reference: Option<String>,
    source_transaction_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
    confirmation_attempts: i32,
    last_confirmation_check_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PayOrderRow> for PayOrder {
    type Error = DatabaseError;

    fn try_from(row: PayOrderRow) -> Result<Self, Self::Error> {
        let mode = PayOrderMode::from_str(&row.mode).map_err(|e| DatabaseError::decode(e.to_string()))?;
        let status =
            PayOrderStatus::from_str(&row.status).map_err(|e| DatabaseError::decode(e.to_string()))?;

        Ok(PayOrder {
            id: row.id,
            organization_id: row.organization_id,
            mode,
            status,
            destination_currency_id: row.destination_currency_id,
            destination_amount: row.destination_amount,
            destination_value_usd: row.destination_value_usd,
            destination_receiving_address: row.destination_receiving_address,
            source_currency_id: row.source_currency_id,
            source_amount: row.source_amount,
            source_deposit_address: row.source_deposit_address,
            refund_address: row.refund_address,
            routing_service: row.routing_service,
            routing_reference: row.routing_reference,
            source_transaction_hash: row.source_transaction_hash,
            expires_at: row.expires_at,
            metadata: row.metadata,
            confirmation_attempts: row.confirmation_attempts,
            last_confirmation_check_at: row.last_confirmation_check_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert(row: Option<PayOrderRow>) -> DatabaseResult<Option<PayOrder>> {
    row.map(PayOrder::try_from).transpose()
}

fn status_names(statuses: &[PayOrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Postgres-backed pay order store
pub struct PgPayOrderRepository {
    pool: PgPool,
}

impl PgPayOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayOrderStore for PgPayOrderRepository {
    async fn create(&self, order: NewPayOrder) -> DatabaseResult<PayOrder> {
        let row = sqlx::query_as::<_, PayOrderRow>(&format!(
            "INSERT INTO payorders \
             (id, organization_id, mode, status, destination_currency_id, destination_amount, \
              destination_value_usd, destination_receiving_address, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {}",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(order.organization_id)
        .bind(order.mode.as_str())
        .bind(PayOrderStatus::Pending.as_str())
        .bind(order.destination_currency_id)
        .bind(order.destination_amount)
        .bind(order.destination_value_usd)
        .bind(order.destination_receiving_address)
        .bind(order.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        PayOrder::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<PayOrder>> {
        let row = sqlx::query_as::<_, PayOrderRow>(&format!(
            "SELECT {} FROM payorders WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        convert(row)
    }

    async fn reserve(&self, id: Uuid, reservation: &Reservation) -> DatabaseResult<Option<PayOrder>> {
        let row = sqlx::query_as::<_, PayOrderRow>(&format!(
            "UPDATE payorders SET \
               status = $2, \
               source_currency_id = $3, \
               source_amount = $4, \
               source_deposit_address = $5, \
               refund_address = $6, \
               destination_currency_id = COALESCE(destination_currency_id, $7), \
               destination_amount = COALESCE(destination_amount, $8), \
               destination_receiving_address = COALESCE(destination_receiving_address, $9), \
               routing_service = $10, \
               routing_reference = $11, \
               expires_at = $12, \
               updated_at = NOW() \
             WHERE id = $1 AND status = $13 \
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(PayOrderStatus::AwaitingPayment.as_str())
        .bind(&reservation.source_currency_id)
        .bind(&reservation.source_amount)
        .bind(&reservation.source_deposit_address)
        .bind(&reservation.refund_address)
        .bind(&reservation.destination_currency_id)
        .bind(&reservation.destination_amount)
        .bind(&reservation.destination_receiving_address)
        .bind(&reservation.routing_service)
        .bind(&reservation.routing_reference)
        .bind(reservation.expires_at)
        .bind(PayOrderStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        convert(row)
    }

    async fn record_transfer(
        &self,
        id: Uuid,
        tx_hash: &str,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
    ) -> DatabaseResult<Option<PayOrder>> {
        let row = sqlx::query_as::<_, PayOrderRow>(&format!(
            "UPDATE payorders SET status = $3, source_transaction_hash = $2, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($4) \
               AND (source_transaction_hash IS NULL OR source_transaction_hash = $2) \
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(tx_hash)
        .bind(to.as_str())
        .bind(status_names(from))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        convert(row)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
    ) -> DatabaseResult<Option<PayOrder>> {
        let row = sqlx::query_as::<_, PayOrderRow>(&format!(
            "UPDATE payorders SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($3) \
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(status_names(from))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        convert(row)
    }

    async fn find_awaiting_confirmation(&self, limit: i64) -> DatabaseResult<Vec<PayOrder>> {
        let rows = sqlx::query_as::<_, PayOrderRow>(&format!(
            "SELECT {} FROM payorders \
             WHERE status = $1 \
             ORDER BY last_confirmation_check_at ASC NULLS FIRST, created_at ASC \
             LIMIT $2",
            COLUMNS
        ))
        .bind(PayOrderStatus::AwaitingConfirmation.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PayOrder::try_from).collect()
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DatabaseResult<Vec<PayOrder>> {
        let rows = sqlx::query_as::<_, PayOrderRow>(&format!(
            "SELECT {} FROM payorders \
             WHERE status = ANY($1) AND expires_at IS NOT NULL AND expires_at <= $2 \
             ORDER BY expires_at ASC \
             LIMIT $3",
            COLUMNS
        ))
        .bind(status_names(&[
            PayOrderStatus::Pending,
            PayOrderStatus::AwaitingPayment,
        ]))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PayOrder::try_from).collect()
    }

    async fn record_confirmation_attempt(&self, id: Uuid) -> DatabaseResult<Option<PayOrder>> {
        let row = sqlx::query_as::<_, PayOrderRow>(&format!(
            "UPDATE payorders SET \
               confirmation_attempts = confirmation_attempts + 1, \
               last_confirmation_check_at = NOW(), \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        convert(row)
    }
}
