use serde::Deserialize;
use serde_json::Value as JsonValue;

pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Size of an SPL token account, used to filter `getProgramAccounts`
pub const TOKEN_ACCOUNT_SIZE: u64 = 165;
/// Offset of the owner field inside an SPL token account
pub const TOKEN_ACCOUNT_OWNER_OFFSET: u64 = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct ValueResponse<T> {
    pub value: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramAccount {
    pub pubkey: String,
    pub account: ProgramAccountData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramAccountData {
    pub data: ParsedAccountData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedAccountData {
    pub parsed: ParsedTokenAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedTokenAccount {
    pub info: TokenAccountInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAccountInfo {
    pub mint: String,
    pub token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiTokenAmount {
    pub amount: String,
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaTransaction {
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
    pub transaction: TransactionBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<JsonValue>,
    #[serde(default)]
    pub inner_instructions: Vec<InnerInstructions>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InnerInstructions {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionBody {
    pub message: TransactionMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    #[serde(default)]
    pub account_keys: Vec<AccountKey>,
    #[serde(default)]
    pub instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountKey {
    pub pubkey: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInstruction {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub program_id: String,
    /// Absent for instructions the node cannot parse; a bare string for memos
    #[serde(default)]
    pub parsed: Option<JsonValue>,
}

impl ParsedInstruction {
    pub fn kind(&self) -> Option<&str> {
        self.parsed.as_ref()?.get("type")?.as_str()
    }

    pub fn info(&self) -> Option<&JsonValue> {
        self.parsed.as_ref()?.get("info")
    }

    pub fn is_system(&self) -> bool {
        self.program_id == SYSTEM_PROGRAM_ID || self.program.as_deref() == Some("system")
    }

    pub fn is_spl_token(&self) -> bool {
        self.program_id == TOKEN_PROGRAM_ID
            || self.program_id == TOKEN_2022_PROGRAM_ID
            || matches!(
                self.program.as_deref(),
                Some("spl-token") | Some("spl-token-2022")
            )
    }
}
