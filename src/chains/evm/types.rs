use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::chains::error::{ChainError, ChainResult};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// First four bytes of keccak256("transfer(address,uint256)")
pub const TRANSFER_SELECTOR: &str = "0xa9059cbb";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub block_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalancesResult {
    #[serde(default)]
    pub token_balances: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceEntry {
    pub contract_address: String,
    #[serde(default)]
    pub token_balance: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Parse a JSON-RPC hex quantity (`0x1bc`) into an integer amount
pub fn parse_hex_quantity(value: &str) -> ChainResult<BigDecimal> {
    let digits = strip_0x(value.trim());
    if digits.is_empty() {
        return Ok(BigDecimal::from(0));
    }
    BigInt::parse_bytes(digits.as_bytes(), 16)
        .map(|n| BigDecimal::new(n, 0))
        .ok_or_else(|| ChainError::invalid_response(format!("invalid hex quantity: {}", value)))
}

/// Parse an ABI-encoded uint256 word (log data, calldata argument)
pub fn parse_uint256_word(value: &str) -> ChainResult<BigDecimal> {
    let bytes = hex::decode(strip_0x(value.trim()))
        .map_err(|e| ChainError::invalid_response(format!("invalid uint256 data: {}", e)))?;
    Ok(BigDecimal::new(BigInt::from_bytes_be(Sign::Plus, &bytes), 0))
}

/// Last 20 bytes of a 32-byte topic, as a lowercase `0x` address
pub fn topic_to_address(topic: &str) -> ChainResult<String> {
    let digits = strip_0x(topic.trim());
    if digits.len() != 64 || hex::decode(digits).is_err() {
        return Err(ChainError::invalid_response(format!(
            "invalid address topic: {}",
            topic
        )));
    }
    Ok(format!("0x{}", digits[24..].to_lowercase()))
}

/// Input data is empty (`0x`) for plain value transfers
pub fn is_empty_input(input: &str) -> bool {
    strip_0x(input.trim()).is_empty()
}

pub fn is_transfer_call(input: &str) -> bool {
    input.trim().to_lowercase().starts_with(TRANSFER_SELECTOR)
}

impl EvmReceipt {
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1") | Some("0x01"))
    }

    /// First `Transfer` event with exactly three topics
    pub fn transfer_log(&self) -> Option<&EvmLog> {
        self.logs.iter().find(|log| {
            log.topics.len() == 3 && log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC)
        })
    }
}
