//! Sui adapter over the Sui JSON-RPC API

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use tracing::debug;

use super::error::{ChainError, ChainResult};
use super::rpc::JsonRpcClient;
use super::traits::{Balance, ChainAdapter, Transfer, TransferInfo};
use crate::currency::{Chain, ChainId, Currency};

const PROGRAMMABLE_TRANSACTION: &str = "ProgrammableTransaction";
const GAS_COIN: &str = "GasCoin";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiBalance {
    pub coin_type: String,
    pub total_balance: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiTransactionBlock {
    pub digest: String,
    #[serde(default)]
    pub transaction: Option<SuiTransactionEnvelope>,
    #[serde(default)]
    pub effects: Option<SuiEffects>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiTransactionEnvelope {
    pub data: SuiTransactionData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiTransactionData {
    pub sender: String,
    pub transaction: SuiTransactionKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiTransactionKind {
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<JsonValue>,
    #[serde(default)]
    pub transactions: Vec<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiEffects {
    pub status: SuiExecutionStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiExecutionStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SuiObjectResponse {
    #[serde(default)]
    data: Option<SuiObjectData>,
}

#[derive(Debug, Clone, Deserialize)]
struct SuiObjectData {
    #[serde(rename = "type", default)]
    object_type: Option<String>,
}

/// What moved in a programmable transaction
#[derive(Debug, Clone, PartialEq)]
pub enum SuiCoin {
    Native,
    /// Coin object whose type must still be looked up
    Object(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuiParsedTransfer {
    pub sender: String,
    pub recipient: String,
    pub amount: BigDecimal,
    pub coin: SuiCoin,
    pub confirmed: bool,
}

fn pure_value<'a>(input: &'a JsonValue, value_type: &str) -> Option<&'a JsonValue> {
    let is_match = input.get("type")?.as_str()? == "pure"
        && input.get("valueType")?.as_str()? == value_type;
    if is_match {
        input.get("value")
    } else {
        None
    }
}

fn json_amount(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::String(s) => BigDecimal::from_str(s).ok(),
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn splits_gas_coin(command: &JsonValue) -> bool {
    command
        .get("SplitCoins")
        .and_then(|args| args.get(0))
        .and_then(JsonValue::as_str)
        == Some(GAS_COIN)
}

/// Classify a programmable transaction as a native or object-typed transfer
pub fn parse_transaction_block(block: &SuiTransactionBlock) -> ChainResult<SuiParsedTransfer> {
    let data = &block
        .transaction
        .as_ref()
        .ok_or_else(|| ChainError::invalid_response("transaction block without input"))?
        .data;

    if data.transaction.kind != PROGRAMMABLE_TRANSACTION {
        return Err(ChainError::no_transfer_found(&block.digest));
    }

    if let Some(effects) = &block.effects {
        if effects.status.status == "failure" {
            return Err(ChainError::transaction_failed(
                &block.digest,
                effects.status.error.clone().unwrap_or_else(|| "failure".to_string()),
            ));
        }
    }

    let inputs = &data.transaction.inputs;
    let amount = inputs
        .iter()
        .find_map(|input| pure_value(input, "u64").and_then(json_amount))
        .ok_or_else(|| ChainError::no_transfer_found(&block.digest))?;
    let recipient = inputs
        .iter()
        .find_map(|input| pure_value(input, "address").and_then(JsonValue::as_str))
        .ok_or_else(|| ChainError::no_transfer_found(&block.digest))?;

    let coin = if data.transaction.transactions.iter().any(splits_gas_coin) {
        SuiCoin::Native
    } else {
        let object_id = inputs
            .iter()
            .find(|input| {
                input.get("type").and_then(JsonValue::as_str) == Some("object")
                    && input.get("objectType").and_then(JsonValue::as_str)
                        == Some("immOrOwnedObject")
            })
            .and_then(|input| input.get("objectId"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ChainError::no_transfer_found(&block.digest))?;
        SuiCoin::Object(object_id.to_string())
    };

    let confirmed = block
        .effects
        .as_ref()
        .map(|effects| effects.status.status == "success")
        .unwrap_or(false);

    Ok(SuiParsedTransfer {
        sender: data.sender.to_lowercase(),
        recipient: recipient.to_lowercase(),
        amount,
        coin,
        confirmed,
    })
}

/// `0x2::coin::Coin<T>` to `T`
pub fn coin_type_from_object_type(object_type: &str) -> Option<&str> {
    object_type
        .strip_prefix("0x2::coin::Coin<")?
        .strip_suffix('>')
}

pub struct SuiAdapter {
    chain: &'static Chain,
    rpc: JsonRpcClient,
}

impl SuiAdapter {
    pub fn new(chain: &'static Chain, rpc: JsonRpcClient) -> Self {
        Self { chain, rpc }
    }

    async fn coin_currency(&self, coin: &SuiCoin) -> ChainResult<Currency> {
        let object_id = match coin {
            SuiCoin::Native => return Ok(Currency::native(self.chain.id)),
            SuiCoin::Object(object_id) => object_id,
        };

        let object: SuiObjectResponse = self
            .rpc
            .call("sui_getObject", json!([object_id, { "showType": true }]))
            .await?;
        let object_type = object
            .data
            .and_then(|data| data.object_type)
            .ok_or_else(|| ChainError::invalid_response(format!("object {} has no type", object_id)))?;
        let coin_type = coin_type_from_object_type(&object_type).ok_or_else(|| {
            ChainError::invalid_response(format!("object {} is not a coin: {}", object_id, object_type))
        })?;

        Ok(Currency::new(self.chain.id, Some(coin_type))?)
    }
}

#[async_trait]
impl ChainAdapter for SuiAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain.id
    }

    async fn get_wallet_balances(&self, address: &str) -> ChainResult<Vec<Balance>> {
        let balances: Vec<SuiBalance> = self
            .rpc
            .call("suix_getAllBalances", json!([address]))
            .await?;

        balances
            .into_iter()
            .map(|balance| {
                let currency = Currency::new(self.chain.id, Some(&balance.coin_type))?;
                let currency = if currency.is_native() {
                    Currency::from_chain(self.chain)
                } else {
                    currency
                };
                let raw = BigDecimal::from_str(&balance.total_balance).map_err(|_| {
                    ChainError::invalid_response(format!(
                        "invalid Sui balance: {}",
                        balance.total_balance
                    ))
                })?;
                Ok(Balance::new(currency, raw))
            })
            .collect()
    }

    async fn get_transfer_details(&self, tx_hash: &str) -> ChainResult<Option<Transfer>> {
        let block: SuiTransactionBlock = match self
            .rpc
            .call(
                "sui_getTransactionBlock",
                json!([
                    tx_hash,
                    { "showInput": true, "showEffects": true, "showEvents": true }
                ]),
            )
            .await
        {
            Ok(block) => block,
            Err(ChainError::Rpc { message, .. }) if message.contains("Could not find") => {
                debug!(tx_hash, "Sui transaction not visible yet");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let parsed = parse_transaction_block(&block)?;
        let currency = self.coin_currency(&parsed.coin).await?;

        Ok(Some(
            TransferInfo {
                tx_hash: tx_hash.to_string(),
                currency,
                source_address: parsed.sender,
                destination_address: parsed.recipient,
                raw_amount: parsed.amount,
                confirmed: parsed.confirmed,
            }
            .into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(inputs: JsonValue, commands: JsonValue, status: &str) -> SuiTransactionBlock {
        serde_json::from_value(json!({
            "digest": "D1g3st",
            "transaction": { "data": {
                "sender": "0xAAA",
                "transaction": {
                    "kind": "ProgrammableTransaction",
                    "inputs": inputs,
                    "transactions": commands
                }
            }},
            "effects": { "status": { "status": status } }
        }))
        .unwrap()
    }

    fn pure_inputs() -> Vec<JsonValue> {
        vec![
            json!({ "type": "pure", "valueType": "u64", "value": "2500000000" }),
            json!({ "type": "pure", "valueType": "address", "value": "0xBBB" }),
        ]
    }

    #[test]
    fn test_native_split_from_gas_coin() {
        let parsed = parse_transaction_block(&block(
            json!(pure_inputs()),
            json!([
                { "SplitCoins": ["GasCoin", [{ "Input": 0 }]] },
                { "TransferObjects": [[{ "NestedResult": [0, 0] }], { "Input": 1 }] }
            ]),
            "success",
        ))
        .unwrap();

        assert_eq!(parsed.coin, SuiCoin::Native);
        assert_eq!(parsed.sender, "0xaaa");
        assert_eq!(parsed.recipient, "0xbbb");
        assert_eq!(parsed.amount, BigDecimal::from(2_500_000_000u64));
        assert!(parsed.confirmed);
    }

    #[test]
    fn test_token_transfer_uses_coin_object() {
        let mut inputs = pure_inputs();
        inputs.push(json!({ "type": "object", "objectType": "immOrOwnedObject", "objectId": "0xc01n" }));

        let parsed = parse_transaction_block(&block(
            json!(inputs),
            json!([{ "SplitCoins": [{ "Input": 2 }, [{ "Input": 0 }]] }]),
            "success",
        ))
        .unwrap();
        assert_eq!(parsed.coin, SuiCoin::Object("0xc01n".to_string()));
    }

    #[test]
    fn test_failed_effects() {
        let err = parse_transaction_block(&block(json!(pure_inputs()), json!([]), "failure"))
            .unwrap_err();
        assert!(matches!(err, ChainError::TransactionFailed { .. }));
    }

    #[test]
    fn test_non_programmable_kind_is_rejected() {
        let mut b = block(json!(pure_inputs()), json!([]), "success");
        if let Some(envelope) = b.transaction.as_mut() {
            envelope.data.transaction.kind = "ConsensusCommitPrologue".to_string();
        }
        assert!(matches!(
            parse_transaction_block(&b),
            Err(ChainError::NoTransferFound { .. })
        ));
    }

    #[test]
    fn test_coin_type_extraction() {
        assert_eq!(
            coin_type_from_object_type("0x2::coin::Coin<0xdba3::usdc::USDC>"),
            Some("0xdba3::usdc::USDC")
        );
        assert_eq!(coin_type_from_object_type("0x2::kiosk::Kiosk"), None);
    }
}
