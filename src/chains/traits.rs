use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::error::ChainResult;
use crate::currency::{ChainId, Currency};

/// A wallet's holding of one currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: Currency,
    /// Amount in the currency's smallest unit
    pub raw_amount: BigDecimal,
}

impl Balance {
    pub fn new(currency: Currency, raw_amount: BigDecimal) -> Self {
        Self {
            currency,
            raw_amount,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.raw_amount == BigDecimal::from(0)
    }

    /// UI balance, when the currency's decimals are known
    pub fn ui_amount(&self) -> Option<BigDecimal> {
        self.currency.raw_to_ui(&self.raw_amount).ok()
    }
}

/// Single-recipient transfer re-derived from an account-model chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub tx_hash: String,
    pub currency: Currency,
    pub source_address: String,
    pub destination_address: String,
    pub raw_amount: BigDecimal,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtxoOutput {
    pub destination_address: String,
    pub raw_amount: BigDecimal,
}

/// Transfer on a UTXO chain: one declared source, any number of outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtxoTransferInfo {
    pub tx_hash: String,
    pub currency: Currency,
    pub source_address: String,
    pub confirmed: bool,
    pub outputs: Vec<UtxoOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transfer {
    Account(TransferInfo),
    Utxo(UtxoTransferInfo),
}

impl Transfer {
    pub fn tx_hash(&self) -> &str {
        match self {
            Transfer::Account(t) => &t.tx_hash,
            Transfer::Utxo(t) => &t.tx_hash,
        }
    }

    pub fn currency(&self) -> &Currency {
        match self {
            Transfer::Account(t) => &t.currency,
            Transfer::Utxo(t) => &t.currency,
        }
    }

    pub fn source_address(&self) -> &str {
        match self {
            Transfer::Account(t) => &t.source_address,
            Transfer::Utxo(t) => &t.source_address,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        match self {
            Transfer::Account(t) => t.confirmed,
            Transfer::Utxo(t) => t.confirmed,
        }
    }
}

impl From<TransferInfo> for Transfer {
    fn from(info: TransferInfo) -> Self {
        Transfer::Account(info)
    }
}

impl From<UtxoTransferInfo> for Transfer {
    fn from(info: UtxoTransferInfo) -> Self {
        Transfer::Utxo(info)
    }
}

/// Read-only access to one chain: balances and transfer re-derivation.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Native balance plus every discoverable token holding of `address`
    async fn get_wallet_balances(&self, address: &str) -> ChainResult<Vec<Balance>>;

    /// Re-derive the transfer carried by `tx_hash`.
    ///
    /// `Ok(None)` means the transaction is not visible on chain yet.
    async fn get_transfer_details(&self, tx_hash: &str) -> ChainResult<Option<Transfer>>;
}
