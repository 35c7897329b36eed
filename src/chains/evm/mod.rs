//! EVM chains through Alchemy's JSON-RPC endpoints

pub mod types;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::json;
use tracing::{debug, warn};

use self::types::{
    is_empty_input, is_transfer_call, parse_hex_quantity, parse_uint256_word, topic_to_address,
    EvmReceipt, EvmTransaction, TokenBalancesResult,
};
use super::error::{ChainError, ChainResult};
use super::rpc::JsonRpcClient;
use super::traits::{Balance, ChainAdapter, Transfer, TransferInfo};
use crate::currency::{Chain, ChainId, Currency, ServiceType};
use crate::services::http_client::ApiHttpClient;

pub struct EvmAdapter {
    chain: &'static Chain,
    rpc: JsonRpcClient,
}

impl EvmAdapter {
    pub fn new(chain: &'static Chain, rpc: JsonRpcClient) -> Self {
        Self { chain, rpc }
    }

    /// Adapter against `https://{alias}.g.alchemy.com/v2/{key}`
    pub fn alchemy(chain: &'static Chain, api_key: &str, http: ApiHttpClient) -> ChainResult<Self> {
        let alias = chain
            .alias(ServiceType::Alchemy)
            .ok_or_else(|| ChainError::unsupported_chain(chain.name))?;
        let url = format!("https://{}.g.alchemy.com/v2/{}", alias, api_key);
        Ok(Self::new(chain, JsonRpcClient::new(http, url)))
    }

    async fn native_balance(&self, address: &str) -> ChainResult<Balance> {
        let hex: String = self
            .rpc
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(Balance::new(
            Currency::from_chain(self.chain),
            parse_hex_quantity(&hex)?,
        ))
    }

    async fn token_balances(&self, address: &str) -> ChainResult<Vec<Balance>> {
        let result: TokenBalancesResult = self
            .rpc
            .call("alchemy_getTokenBalances", json!([address, "erc20"]))
            .await?;

        let mut balances = Vec::with_capacity(result.token_balances.len());
        for entry in result.token_balances {
            let raw = match (&entry.token_balance, &entry.error) {
                (Some(raw), None) => raw,
                _ => {
                    debug!(
                        chain = self.chain.name,
                        contract = %entry.contract_address,
                        "skipping token balance with error"
                    );
                    continue;
                }
            };
            let currency = Currency::new(self.chain.id, Some(&entry.contract_address))?;
            balances.push(Balance::new(currency, parse_hex_quantity(raw)?));
        }
        Ok(balances)
    }
}

/// Derive the transfer carried by an EVM transaction.
///
/// Plain value transfers come straight from the transaction. ERC20 `transfer`
/// calls are read from the receipt's `Transfer` event. `Ok(None)` means the
/// receipt needed for a token transfer is not available yet.
pub fn transfer_from_parts(
    chain_id: ChainId,
    tx: &EvmTransaction,
    receipt: Option<&EvmReceipt>,
) -> ChainResult<Option<TransferInfo>> {
    if let Some(receipt) = receipt {
        if receipt.status.is_some() && !receipt.succeeded() {
            return Err(ChainError::transaction_failed(&tx.hash, "execution reverted"));
        }
    }
    let confirmed = receipt
        .map(|r| r.succeeded() && r.block_number.is_some())
        .unwrap_or(false)
        && tx.block_number.is_some();

    let value = parse_hex_quantity(&tx.value)?;
    if value > BigDecimal::from(0) && is_empty_input(&tx.input) {
        let to = tx
            .to
            .as_deref()
            .ok_or_else(|| ChainError::no_transfer_found(&tx.hash))?;
        return Ok(Some(TransferInfo {
            tx_hash: tx.hash.clone(),
            currency: Currency::native(chain_id),
            source_address: tx.from.to_lowercase(),
            destination_address: to.to_lowercase(),
            raw_amount: value,
            confirmed,
        }));
    }

    if is_transfer_call(&tx.input) {
        let receipt = match receipt {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let log = receipt
            .transfer_log()
            .ok_or_else(|| ChainError::no_transfer_found(&tx.hash))?;

        return Ok(Some(TransferInfo {
            tx_hash: tx.hash.clone(),
            currency: Currency::new(chain_id, Some(&log.address))?,
            source_address: topic_to_address(&log.topics[1])?,
            destination_address: topic_to_address(&log.topics[2])?,
            raw_amount: parse_uint256_word(&log.data)?,
            confirmed,
        }));
    }

    Err(ChainError::no_transfer_found(&tx.hash))
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain.id
    }

    async fn get_wallet_balances(&self, address: &str) -> ChainResult<Vec<Balance>> {
        let (native, tokens) = futures::try_join!(
            self.native_balance(address),
            self.token_balances(address)
        )?;

        let mut balances = Vec::with_capacity(tokens.len() + 1);
        balances.push(native);
        balances.extend(tokens);
        Ok(balances)
    }

    async fn get_transfer_details(&self, tx_hash: &str) -> ChainResult<Option<Transfer>> {
        let tx: Option<EvmTransaction> = self
            .rpc
            .call("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        let tx = match tx {
            Some(tx) => tx,
            None => {
                debug!(chain = self.chain.name, tx_hash, "transaction not visible yet");
                return Ok(None);
            }
        };

        let receipt: Option<EvmReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        let transfer = transfer_from_parts(self.chain.id, &tx, receipt.as_ref());
        if let Err(e) = &transfer {
            warn!(chain = self.chain.name, tx_hash, error = %e, "could not derive EVM transfer");
        }
        Ok(transfer?.map(Transfer::from))
    }
}
