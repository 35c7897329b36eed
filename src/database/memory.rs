//! In-process stores used with `SKIP_EXTERNALS` and in tests.
//!
//! Each call holds the map lock for its whole read-check-write, so guarded
//! updates are atomic the same way the SQL `WHERE status = ...` updates are.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::DatabaseResult;
use super::repository::{Organization, OrganizationStore, PayOrderStore};
use crate::services::payorder::model::{NewPayOrder, PayOrder, PayOrderStatus, Reservation};

#[derive(Debug, Default)]
pub struct InMemoryPayOrderStore {
    orders: Mutex<HashMap<Uuid, PayOrder>>,
}

impl InMemoryPayOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` only when the order exists and `guard` accepts it
    async fn guarded<G, U>(&self, id: Uuid, guard: G, update: U) -> DatabaseResult<Option<PayOrder>>
    where
        G: FnOnce(&PayOrder) -> bool + Send,
        U: FnOnce(&mut PayOrder) + Send,
    {
        let mut orders = self.orders.lock().await;
        match orders.get_mut(&id) {
            Some(order) if guard(order) => {
                update(order);
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl PayOrderStore for InMemoryPayOrderStore {
    async fn create(&self, order: NewPayOrder) -> DatabaseResult<PayOrder> {
        let now = Utc::now();
        let order = PayOrder {
            id: Uuid::new_v4(),
            organization_id: order.organization_id,
            mode: order.mode,
            status: PayOrderStatus::Pending,
            destination_currency_id: order.destination_currency_id,
            destination_amount: order.destination_amount,
            destination_value_usd: order.destination_value_usd,
            destination_receiving_address: order.destination_receiving_address,
            source_currency_id: None,
            source_amount: None,
            source_deposit_address: None,
            refund_address: None,
            routing_service: None,
            routing_reference: None,
            source_transaction_hash: None,
            expires_at: None,
            metadata: order.metadata,
            confirmation_attempts: 0,
            last_confirmation_check_at: None,
            created_at: now,
            updated_at: now,
        };
        self.orders.lock().await.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<PayOrder>> {
        Ok(self.orders.lock().await.get(&id).cloned())
    }

    async fn reserve(&self, id: Uuid, reservation: &Reservation) -> DatabaseResult<Option<PayOrder>> {
        let reservation = reservation.clone();
        self.guarded(
            id,
            |order| order.status == PayOrderStatus::Pending,
            move |order| {
                order.status = PayOrderStatus::AwaitingPayment;
                order.source_currency_id = Some(reservation.source_currency_id);
                order.source_amount = Some(reservation.source_amount);
                order.source_deposit_address = Some(reservation.source_deposit_address);
                order.refund_address = Some(reservation.refund_address);
                order
                    .destination_currency_id
                    .get_or_insert(reservation.destination_currency_id);
                order
                    .destination_amount
                    .get_or_insert(reservation.destination_amount);
                order
                    .destination_receiving_address
                    .get_or_insert(reservation.destination_receiving_address);
                order.routing_service = Some(reservation.routing_service);
                order.routing_reference = Some(reservation.routing_reference);
                order.expires_at = Some(reservation.expires_at);
            },
        )
        .await
    }

    async fn record_transfer(
        &self,
        id: Uuid,
        tx_hash: &str,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
    ) -> DatabaseResult<Option<PayOrder>> {
        let tx_hash = tx_hash.to_string();
        let hash = tx_hash.clone();
        self.guarded(
            id,
            |order| {
                from.contains(&order.status)
                    && order
                        .source_transaction_hash
                        .as_deref()
                        .map(|existing| existing == hash)
                        .unwrap_or(true)
            },
            move |order| {
                order.status = to;
                order.source_transaction_hash = Some(tx_hash);
            },
        )
        .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[PayOrderStatus],
        to: PayOrderStatus,
    ) -> DatabaseResult<Option<PayOrder>> {
        self.guarded(id, |order| from.contains(&order.status), move |order| order.status = to)
            .await
    }

    async fn find_awaiting_confirmation(&self, limit: i64) -> DatabaseResult<Vec<PayOrder>> {
        let orders = self.orders.lock().await;
        let mut found: Vec<PayOrder> = orders
            .values()
            .filter(|o| o.status == PayOrderStatus::AwaitingConfirmation)
            .cloned()
            .collect();
        found.sort_by_key(|o| (o.last_confirmation_check_at, o.created_at));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DatabaseResult<Vec<PayOrder>> {
        let orders = self.orders.lock().await;
        let mut found: Vec<PayOrder> = orders
            .values()
            .filter(|o| {
                matches!(
                    o.status,
                    PayOrderStatus::Pending | PayOrderStatus::AwaitingPayment
                ) && o.is_expired_at(now)
            })
            .cloned()
            .collect();
        found.sort_by_key(|o| o.expires_at);
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn record_confirmation_attempt(&self, id: Uuid) -> DatabaseResult<Option<PayOrder>> {
        self.guarded(
            id,
            |_| true,
            |order| {
                order.confirmation_attempts += 1;
                order.last_confirmation_check_at = Some(Utc::now());
            },
        )
        .await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrganizationStore {
    organizations: Mutex<HashMap<Uuid, Organization>>,
}

impl InMemoryOrganizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, organization: Organization) {
        self.organizations
            .lock()
            .await
            .insert(organization.id, organization);
    }
}

#[async_trait]
impl OrganizationStore for InMemoryOrganizationStore {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Organization>> {
        Ok(self.organizations.lock().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payorder::model::PayOrderMode;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn new_order() -> NewPayOrder {
        NewPayOrder {
            organization_id: Uuid::new_v4(),
            mode: PayOrderMode::Sale,
            destination_currency_id: None,
            destination_amount: None,
            destination_value_usd: Some(BigDecimal::from(100)),
            destination_receiving_address: None,
            metadata: json!({"items": []}),
        }
    }

    fn reservation() -> Reservation {
        Reservation {
            source_currency_id: "1".to_string(),
            source_amount: BigDecimal::from(5),
            source_deposit_address: "0xdeposit".to_string(),
            refund_address: "0xpayer".to_string(),
            destination_currency_id: "8453".to_string(),
            destination_amount: BigDecimal::from(7),
            destination_receiving_address: "0xmerchant".to_string(),
            routing_service: "CHANGENOW".to_string(),
            routing_reference: "ex-1".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn test_reserve_only_once() {
        let store = InMemoryPayOrderStore::new();
        let order = store.create(new_order()).await.unwrap();

        let reserved = store.reserve(order.id, &reservation()).await.unwrap().unwrap();
        assert_eq!(reserved.status, PayOrderStatus::AwaitingPayment);
        assert_eq!(reserved.destination_currency_id.as_deref(), Some("8453"));

        assert!(store.reserve(order.id, &reservation()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_transfer_keeps_first_hash() {
        let store = InMemoryPayOrderStore::new();
        let order = store.create(new_order()).await.unwrap();
        store.reserve(order.id, &reservation()).await.unwrap();

        let from = [PayOrderStatus::AwaitingPayment, PayOrderStatus::AwaitingConfirmation];
        let updated = store
            .record_transfer(order.id, "0xaaa", &from, PayOrderStatus::AwaitingConfirmation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.source_transaction_hash.as_deref(), Some("0xaaa"));

        let replaced = store
            .record_transfer(order.id, "0xbbb", &from, PayOrderStatus::Received)
            .await
            .unwrap();
        assert!(replaced.is_none());
    }

    #[tokio::test]
    async fn test_find_expired_skips_confirming_orders() {
        let store = InMemoryPayOrderStore::new();
        let order = store.create(new_order()).await.unwrap();
        let mut lapsed = reservation();
        lapsed.expires_at = Utc::now() - chrono::Duration::minutes(1);
        store.reserve(order.id, &lapsed).await.unwrap();

        let expired = store.find_expired(Utc::now(), 10).await.unwrap();
        assert_eq!(expired.len(), 1);

        store
            .update_status(
                order.id,
                &[PayOrderStatus::AwaitingPayment],
                PayOrderStatus::AwaitingConfirmation,
            )
            .await
            .unwrap();
        assert!(store.find_expired(Utc::now(), 10).await.unwrap().is_empty());
        assert_eq!(store.find_awaiting_confirmation(10).await.unwrap().len(), 1);
    }
}
