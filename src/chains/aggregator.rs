use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{ChainError, ChainResult};
use super::traits::{Balance, ChainAdapter, Transfer};
use crate::currency::{ChainId, ChainType};

/// Fans balance lookups out across chain adapters and routes transfer lookups
/// to the one adapter responsible for a chain.
pub struct ChainAggregator {
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    concurrency: usize,
}

impl ChainAggregator {
    pub fn new(adapters: Vec<Arc<dyn ChainAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.chain_id(), adapter))
                .collect(),
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn adapter(&self, chain_id: ChainId) -> ChainResult<&Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&chain_id)
            .ok_or_else(|| ChainError::unsupported_chain(chain_id))
    }

    /// Chains with an adapter, ordered by id
    pub fn supported_chains(&self, chain_type: ChainType) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self
            .adapters
            .keys()
            .copied()
            .filter(|id| id.chain_type() == chain_type)
            .collect();
        ids.sort();
        ids
    }

    /// Balances of `address` across every requested chain of `chain_type`.
    ///
    /// Without explicit `chain_ids` every supported chain of the type is
    /// queried. A failing chain is logged and left out; the call only fails
    /// when no chain answers.
    pub async fn get_wallet_balances(
        &self,
        address: &str,
        chain_type: ChainType,
        chain_ids: Option<&[ChainId]>,
        filter_zero: bool,
    ) -> ChainResult<Vec<Balance>> {
        let targets: Vec<ChainId> = match chain_ids {
            Some(ids) => {
                if let Some(bad) = ids.iter().find(|id| id.chain_type() != chain_type) {
                    return Err(ChainError::unsupported_chain(bad));
                }
                ids.to_vec()
            }
            None => self.supported_chains(chain_type),
        };
        if targets.is_empty() {
            return Err(ChainError::unsupported_chain(chain_type));
        }

        let adapters = targets
            .iter()
            .map(|id| self.adapter(*id).map(|adapter| (*id, adapter.clone())))
            .collect::<ChainResult<Vec<_>>>()?;

        let mut results: Vec<(ChainId, ChainResult<Vec<Balance>>)> = stream::iter(adapters)
            .map(|(chain_id, adapter)| async move {
                (chain_id, adapter.get_wallet_balances(address).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(chain_id, _)| *chain_id);

        let mut balances = Vec::new();
        let mut first_error = None;
        let mut answered = 0usize;
        for (chain_id, result) in results {
            match result {
                Ok(found) => {
                    answered += 1;
                    balances.extend(found);
                }
                Err(e) => {
                    warn!(chain_id = %chain_id, error = %e, "balance lookup failed, skipping chain");
                    first_error.get_or_insert(e);
                }
            }
        }

        if answered == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        if filter_zero {
            balances.retain(|balance| !balance.is_zero());
        }
        debug!(chain_type = %chain_type, count = balances.len(), "wallet balances aggregated");
        Ok(balances)
    }

    pub async fn get_transfer_details(
        &self,
        tx_hash: &str,
        chain_id: ChainId,
    ) -> ChainResult<Option<Transfer>> {
        self.adapter(chain_id)?.get_transfer_details(tx_hash).await
    }
}
