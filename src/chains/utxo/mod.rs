//! UTXO chains through block-explorer REST endpoints (blockchain.info)

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use super::error::{ChainError, ChainResult};
use super::traits::{Balance, ChainAdapter, Transfer, UtxoOutput, UtxoTransferInfo};
use crate::currency::{Chain, ChainId, Currency};
use crate::services::http_client::ApiHttpClient;

#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub double_spend: bool,
    #[serde(default)]
    pub block_height: Option<i64>,
    #[serde(default)]
    pub inputs: Vec<RawInput>,
    #[serde(default)]
    pub out: Vec<RawOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInput {
    #[serde(default)]
    pub prev_out: Option<RawOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOutput {
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct AddressBalance {
    confirmed: u64,
}

/// Build the transfer view of a raw explorer transaction
pub fn transfer_from_raw(
    chain_id: ChainId,
    tx_hash: &str,
    tx: &RawTransaction,
) -> ChainResult<UtxoTransferInfo> {
    if let Some(error) = &tx.error {
        return Err(ChainError::invalid_response(format!(
            "explorer reported error for {}: {}",
            tx_hash, error
        )));
    }
    if tx.double_spend {
        return Err(ChainError::double_spend(tx_hash));
    }

    let source_address = tx
        .inputs
        .first()
        .and_then(|input| input.prev_out.as_ref())
        .and_then(|prev| prev.addr.clone())
        .ok_or_else(|| ChainError::no_transfer_found(tx_hash))?;

    let outputs = tx
        .out
        .iter()
        .filter_map(|out| {
            out.addr.as_ref().map(|addr| UtxoOutput {
                destination_address: addr.clone(),
                raw_amount: BigDecimal::from(out.value),
            })
        })
        .collect();

    Ok(UtxoTransferInfo {
        tx_hash: tx.hash.clone().unwrap_or_else(|| tx_hash.to_string()),
        currency: Currency::native(chain_id),
        source_address,
        confirmed: tx.block_height.map(|h| h > 0).unwrap_or(false),
        outputs,
    })
}

pub struct UtxoAdapter {
    chain: &'static Chain,
    http: ApiHttpClient,
    balance_api_url: String,
    tx_api_url: String,
}

impl UtxoAdapter {
    pub fn new(
        chain: &'static Chain,
        http: ApiHttpClient,
        balance_api_url: impl Into<String>,
        tx_api_url: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            http,
            balance_api_url: balance_api_url.into(),
            tx_api_url: tx_api_url.into(),
        }
    }
}

#[async_trait]
impl ChainAdapter for UtxoAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain.id
    }

    async fn get_wallet_balances(&self, address: &str) -> ChainResult<Vec<Balance>> {
        let url = format!("{}/{}/balance", self.balance_api_url.trim_end_matches('/'), address);
        let balance: AddressBalance = self.http.get_json(&url, &[]).await?;
        Ok(vec![Balance::new(
            Currency::from_chain(self.chain),
            BigDecimal::from(balance.confirmed),
        )])
    }

    async fn get_transfer_details(&self, tx_hash: &str) -> ChainResult<Option<Transfer>> {
        let url = format!("{}/rawtx/{}", self.tx_api_url.trim_end_matches('/'), tx_hash);
        let response = self.http.send(Method::GET, &url, None, &[]).await?;

        // The explorer answers 4xx/5xx for transactions it has not indexed yet
        if response.status.as_u16() >= 400 {
            debug!(tx_hash, status = %response.status, "UTXO transaction not visible yet");
            return Ok(None);
        }

        let raw: RawTransaction = serde_json::from_str(&response.body)
            .map_err(|e| ChainError::invalid_response(format!("invalid raw transaction: {}", e)))?;
        Ok(Some(transfer_from_raw(self.chain.id, tx_hash, &raw)?.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawTransaction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_multi_output_transaction() {
        let tx = raw(json!({
            "hash": "h",
            "block_height": 840000,
            "inputs": [{ "prev_out": { "addr": "bc1payer", "value": 100 } }],
            "out": [{ "addr": "A", "value": 5 }, { "addr": "B", "value": 50 }, { "value": 0 }]
        }));

        let info = transfer_from_raw(ChainId::Btc, "h", &tx).unwrap();
        assert_eq!(info.source_address, "bc1payer");
        assert!(info.confirmed);
        assert_eq!(info.outputs.len(), 2);
        assert_eq!(info.outputs[1].destination_address, "B");
        assert_eq!(info.outputs[1].raw_amount, BigDecimal::from(50));
        assert_eq!(info.currency, Currency::native(ChainId::Btc));
    }

    #[test]
    fn test_mempool_transaction_is_unconfirmed() {
        let tx = raw(json!({
            "inputs": [{ "prev_out": { "addr": "bc1payer", "value": 100 } }],
            "out": [{ "addr": "B", "value": 50 }]
        }));
        assert!(!transfer_from_raw(ChainId::Btc, "h", &tx).unwrap().confirmed);
    }

    #[test]
    fn test_double_spend_rejected() {
        let tx = raw(json!({ "double_spend": true, "inputs": [], "out": [] }));
        assert!(matches!(
            transfer_from_raw(ChainId::Btc, "h", &tx),
            Err(ChainError::DoubleSpend { .. })
        ));
    }

    #[test]
    fn test_explorer_error_field() {
        let tx = raw(json!({ "error": "Transaction not found" }));
        assert!(matches!(
            transfer_from_raw(ChainId::Btc, "h", &tx),
            Err(ChainError::InvalidResponse { .. })
        ));
    }
}
