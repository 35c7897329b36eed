//! Solana adapter over the standard JSON-RPC API with `jsonParsed` encoding

pub mod types;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use self::types::{
    ParsedInstruction, ProgramAccount, SolanaTransaction, TransactionMeta, ValueResponse,
    TOKEN_ACCOUNT_OWNER_OFFSET, TOKEN_ACCOUNT_SIZE, TOKEN_PROGRAM_ID,
};
use super::error::{ChainError, ChainResult};
use super::rpc::JsonRpcClient;
use super::traits::{Balance, ChainAdapter, Transfer, TransferInfo};
use crate::currency::{Chain, ChainId, Currency, CurrencyMetadata};

pub struct SolanaAdapter {
    chain: &'static Chain,
    rpc: JsonRpcClient,
}

impl SolanaAdapter {
    pub fn new(chain: &'static Chain, rpc: JsonRpcClient) -> Self {
        Self { chain, rpc }
    }

    async fn native_balance(&self, address: &str) -> ChainResult<Balance> {
        let lamports: ValueResponse<u64> = self.rpc.call("getBalance", json!([address])).await?;
        Ok(Balance::new(
            Currency::from_chain(self.chain),
            BigDecimal::from(lamports.value),
        ))
    }

    async fn token_balances(&self, address: &str) -> ChainResult<Vec<Balance>> {
        let accounts: Vec<ProgramAccount> = self
            .rpc
            .call(
                "getProgramAccounts",
                json!([
                    TOKEN_PROGRAM_ID,
                    {
                        "encoding": "jsonParsed",
                        "filters": [
                            { "dataSize": TOKEN_ACCOUNT_SIZE },
                            { "memcmp": { "offset": TOKEN_ACCOUNT_OWNER_OFFSET, "bytes": address } }
                        ]
                    }
                ]),
            )
            .await?;

        accounts
            .into_iter()
            .map(|account| {
                let info = account.account.data.parsed.info;
                let currency = Currency::new(self.chain.id, Some(&info.mint))?.with_metadata(
                    CurrencyMetadata {
                        decimals: info.token_amount.decimals,
                        ..Default::default()
                    },
                );
                Ok(Balance::new(currency, parse_amount(&info.token_amount.amount)?))
            })
            .collect()
    }
}

fn parse_amount(value: &str) -> ChainResult<BigDecimal> {
    BigDecimal::from_str(value)
        .map_err(|_| ChainError::invalid_response(format!("invalid token amount: {}", value)))
}

fn info_str<'a>(info: &'a JsonValue, field: &str) -> Option<&'a str> {
    info.get(field)?.as_str()
}

/// Amount fields arrive as numbers (lamports) or strings (token units)
fn info_amount(info: &JsonValue, field: &str) -> Option<BigDecimal> {
    match info.get(field)? {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s).ok(),
        _ => None,
    }
}

/// A transfer instruction before token accounts are mapped back to wallets
enum RawTransfer {
    Native {
        source: String,
        destination: String,
        lamports: BigDecimal,
    },
    Token {
        source_account: String,
        mint: Option<String>,
        amount: BigDecimal,
    },
}

fn classify(instruction: &ParsedInstruction) -> Option<RawTransfer> {
    let info = instruction.info()?;
    match instruction.kind()? {
        "transfer" if instruction.is_system() => Some(RawTransfer::Native {
            source: info_str(info, "source")?.to_string(),
            destination: info_str(info, "destination")?.to_string(),
            lamports: info_amount(info, "lamports")?,
        }),
        "transfer" if instruction.is_spl_token() => Some(RawTransfer::Token {
            source_account: info_str(info, "source")?.to_string(),
            mint: None,
            amount: info_amount(info, "amount")?,
        }),
        "transferChecked" if instruction.is_spl_token() => Some(RawTransfer::Token {
            source_account: info_str(info, "source")?.to_string(),
            mint: Some(info_str(info, "mint")?.to_string()),
            amount: info_amount(info.get("tokenAmount")?, "amount")?,
        }),
        _ => None,
    }
}

/// Net change per owner of `mint`, in raw units
fn owner_deltas(meta: &TransactionMeta, mint: &str) -> HashMap<String, BigDecimal> {
    let mut deltas: HashMap<String, BigDecimal> = HashMap::new();
    let entries = meta
        .pre_token_balances
        .iter()
        .map(|b| (b, -1))
        .chain(meta.post_token_balances.iter().map(|b| (b, 1)));

    for (balance, sign) in entries {
        if balance.mint != mint {
            continue;
        }
        let (owner, amount) = match (&balance.owner, parse_amount(&balance.ui_token_amount.amount)) {
            (Some(owner), Ok(amount)) => (owner.clone(), amount),
            _ => continue,
        };
        let entry = deltas.entry(owner).or_insert_with(|| BigDecimal::from(0));
        *entry = if sign < 0 {
            &*entry - &amount
        } else {
            &*entry + &amount
        };
    }
    deltas
}

/// Mint of a token account, found through the transaction's token balances
fn mint_of_account(tx: &SolanaTransaction, meta: &TransactionMeta, account: &str) -> Option<String> {
    let index = tx
        .transaction
        .message
        .account_keys
        .iter()
        .position(|key| key.pubkey == account)?;
    meta.pre_token_balances
        .iter()
        .chain(meta.post_token_balances.iter())
        .find(|b| b.account_index == index)
        .map(|b| b.mint.clone())
}

/// Derive the transfer carried by a parsed Solana transaction.
///
/// Top-level instructions are scanned before inner ones. Token-account
/// addresses are mapped back to wallet owners by diffing the token balances.
pub fn transfer_from_transaction(
    tx_hash: &str,
    tx: &SolanaTransaction,
) -> ChainResult<TransferInfo> {
    let empty = TransactionMeta::default();
    let meta = tx.meta.as_ref().unwrap_or(&empty);

    if let Some(err) = meta.err.as_ref().filter(|e| !e.is_null()) {
        return Err(ChainError::transaction_failed(tx_hash, err.to_string()));
    }

    let instructions = tx.transaction.message.instructions.iter().chain(
        meta.inner_instructions
            .iter()
            .flat_map(|inner| inner.instructions.iter()),
    );

    let raw = instructions
        .filter_map(classify)
        .next()
        .ok_or_else(|| ChainError::no_transfer_found(tx_hash))?;

    match raw {
        RawTransfer::Native {
            source,
            destination,
            lamports,
        } => Ok(TransferInfo {
            tx_hash: tx_hash.to_string(),
            currency: Currency::native(ChainId::Sol),
            source_address: source,
            destination_address: destination,
            raw_amount: lamports,
            confirmed: true,
        }),
        RawTransfer::Token {
            source_account,
            mint,
            amount,
        } => {
            let mint = mint
                .or_else(|| mint_of_account(tx, meta, &source_account))
                .ok_or_else(|| ChainError::no_transfer_found(tx_hash))?;

            let deltas = owner_deltas(meta, &mint);
            let decrease = -amount.clone();
            let source = deltas
                .iter()
                .find(|(_, delta)| **delta == decrease)
                .map(|(owner, _)| owner.clone());
            let destination = deltas
                .iter()
                .find(|(_, delta)| **delta == amount)
                .map(|(owner, _)| owner.clone());

            match (source, destination) {
                (Some(source), Some(destination)) => Ok(TransferInfo {
                    tx_hash: tx_hash.to_string(),
                    currency: Currency::new(ChainId::Sol, Some(&mint))?,
                    source_address: source,
                    destination_address: destination,
                    raw_amount: amount,
                    confirmed: true,
                }),
                _ => {
                    debug!(tx_hash, mint = %mint, "token balance changes do not match transfer amount");
                    Err(ChainError::no_transfer_found(tx_hash))
                }
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain.id
    }

    async fn get_wallet_balances(&self, address: &str) -> ChainResult<Vec<Balance>> {
        let (native, tokens) =
            futures::try_join!(self.native_balance(address), self.token_balances(address))?;

        let mut balances = Vec::with_capacity(tokens.len() + 1);
        balances.push(native);
        balances.extend(tokens);
        Ok(balances)
    }

    async fn get_transfer_details(&self, tx_hash: &str) -> ChainResult<Option<Transfer>> {
        let tx: Option<SolanaTransaction> = self
            .rpc
            .call(
                "getTransaction",
                json!([
                    tx_hash,
                    {
                        "encoding": "jsonParsed",
                        "maxSupportedTransactionVersion": 0,
                        "commitment": "confirmed"
                    }
                ]),
            )
            .await?;

        match tx {
            Some(tx) => Ok(Some(transfer_from_transaction(tx_hash, &tx)?.into())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYER: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const MERCHANT: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const PAYER_ATA: &str = "3Kz5Z8mP1Y7QvJd4rJc8uVjVnTQh1rF1yS2o6Rk6wW9e";
    const MERCHANT_ATA: &str = "5Rq9Tn7hB3Lw2Xc4Vd8Ke6Pm1Js9Ya3Qf7Gu2Hz5Nt4W";
    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn token_tx(instruction: JsonValue, inner: bool) -> SolanaTransaction {
        let (top, inner_list) = if inner {
            (json!([]), json!([{ "index": 0, "instructions": [instruction] }]))
        } else {
            (json!([instruction]), json!([]))
        };

        serde_json::from_value(json!({
            "slot": 1,
            "meta": {
                "err": null,
                "innerInstructions": inner_list,
                "preTokenBalances": [
                    { "accountIndex": 1, "mint": USDC_MINT, "owner": PAYER,
                      "uiTokenAmount": { "amount": "100000000", "decimals": 6 } },
                    { "accountIndex": 2, "mint": USDC_MINT, "owner": MERCHANT,
                      "uiTokenAmount": { "amount": "0", "decimals": 6 } }
                ],
                "postTokenBalances": [
                    { "accountIndex": 1, "mint": USDC_MINT, "owner": PAYER,
                      "uiTokenAmount": { "amount": "50000000", "decimals": 6 } },
                    { "accountIndex": 2, "mint": USDC_MINT, "owner": MERCHANT,
                      "uiTokenAmount": { "amount": "50000000", "decimals": 6 } }
                ]
            },
            "transaction": {
                "message": {
                    "accountKeys": [
                        { "pubkey": PAYER }, { "pubkey": PAYER_ATA }, { "pubkey": MERCHANT_ATA }
                    ],
                    "instructions": top
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_native_sol_transfer() {
        let tx: SolanaTransaction = serde_json::from_value(json!({
            "meta": { "err": null },
            "transaction": { "message": {
                "accountKeys": [],
                "instructions": [{
                    "program": "system",
                    "programId": types::SYSTEM_PROGRAM_ID,
                    "parsed": { "type": "transfer", "info": {
                        "source": PAYER, "destination": MERCHANT, "lamports": 1500000000u64
                    }}
                }]
            }}
        }))
        .unwrap();

        let info = transfer_from_transaction("sig", &tx).unwrap();
        assert_eq!(info.currency, Currency::native(ChainId::Sol));
        assert_eq!(info.source_address, PAYER);
        assert_eq!(info.destination_address, MERCHANT);
        assert_eq!(info.raw_amount, BigDecimal::from(1_500_000_000u64));
        assert!(info.confirmed);
    }

    #[test]
    fn test_spl_transfer_resolves_owners() {
        let instruction = json!({
            "program": "spl-token",
            "programId": TOKEN_PROGRAM_ID,
            "parsed": { "type": "transfer", "info": {
                "source": PAYER_ATA, "destination": MERCHANT_ATA, "amount": "50000000", "authority": PAYER
            }}
        });

        let info = transfer_from_transaction("sig", &token_tx(instruction, false)).unwrap();
        assert_eq!(info.source_address, PAYER);
        assert_eq!(info.destination_address, MERCHANT);
        assert_eq!(info.raw_amount, BigDecimal::from(50_000_000));
        assert_eq!(
            info.currency,
            Currency::new(ChainId::Sol, Some(USDC_MINT)).unwrap()
        );
    }

    #[test]
    fn test_inner_transfer_checked() {
        let instruction = json!({
            "program": "spl-token",
            "programId": TOKEN_PROGRAM_ID,
            "parsed": { "type": "transferChecked", "info": {
                "source": PAYER_ATA, "destination": MERCHANT_ATA, "mint": USDC_MINT,
                "tokenAmount": { "amount": "50000000", "decimals": 6 }
            }}
        });

        let info = transfer_from_transaction("sig", &token_tx(instruction, true)).unwrap();
        assert_eq!(info.destination_address, MERCHANT);
    }

    #[test]
    fn test_amount_mismatch_is_no_transfer() {
        let instruction = json!({
            "program": "spl-token",
            "programId": TOKEN_PROGRAM_ID,
            "parsed": { "type": "transfer", "info": {
                "source": PAYER_ATA, "destination": MERCHANT_ATA, "amount": "49000000"
            }}
        });

        let err = transfer_from_transaction("sig", &token_tx(instruction, false)).unwrap_err();
        assert!(matches!(err, ChainError::NoTransferFound { .. }));
    }

    #[test]
    fn test_failed_transaction() {
        let tx: SolanaTransaction = serde_json::from_value(json!({
            "meta": { "err": { "InstructionError": [0, "Custom"] } },
            "transaction": { "message": { "instructions": [] } }
        }))
        .unwrap();
        let err = transfer_from_transaction("sig", &tx).unwrap_err();
        assert!(matches!(err, ChainError::TransactionFailed { .. }));
    }
}
