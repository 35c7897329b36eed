use bigdecimal::BigDecimal;
use thiserror::Error;

use super::traits::{Transfer, TransferInfo, UtxoTransferInfo};
use crate::currency::{ChainType, Currency};

/// Terms a re-derived transfer must satisfy
#[derive(Debug, Clone)]
pub struct ExpectedTransfer {
    pub currency: Currency,
    /// Minimum amount in raw units
    pub raw_amount: BigDecimal,
    pub sender_address: String,
    pub deposit_address: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferMismatch {
    #[error("currency mismatch: expected {expected}, got {actual}")]
    Currency { expected: String, actual: String },

    #[error("sender mismatch: expected {expected}, got {actual}")]
    Sender { expected: String, actual: String },

    #[error("destination mismatch: expected {expected}, got {actual}")]
    Destination { expected: String, actual: String },

    #[error("amount too low: expected at least {expected}, got {actual}")]
    Amount { expected: String, actual: String },

    #[error("no output pays at least {expected} to {destination}")]
    NoMatchingOutput { destination: String, expected: String },
}

/// EVM addresses compare case-insensitively since checksums vary in case.
/// Base58 and bech32 addresses on the other chains compare exactly.
pub fn addresses_match(chain_type: ChainType, a: &str, b: &str) -> bool {
    match chain_type {
        ChainType::Evm => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => a.trim() == b.trim(),
    }
}

pub fn validate_transfer(
    transfer: &Transfer,
    expected: &ExpectedTransfer,
) -> Result<(), TransferMismatch> {
    if transfer.currency() != &expected.currency {
        return Err(TransferMismatch::Currency {
            expected: expected.currency.id().to_string(),
            actual: transfer.currency().id().to_string(),
        });
    }
    if !addresses_match(
        expected.currency.chain_type(),
        transfer.source_address(),
        &expected.sender_address,
    ) {
        return Err(TransferMismatch::Sender {
            expected: expected.sender_address.clone(),
            actual: transfer.source_address().to_string(),
        });
    }

    match transfer {
        Transfer::Account(info) => validate_account(info, expected),
        Transfer::Utxo(info) => validate_utxo(info, expected),
    }
}

fn validate_account(info: &TransferInfo, expected: &ExpectedTransfer) -> Result<(), TransferMismatch> {
    if !addresses_match(
        expected.currency.chain_type(),
        &info.destination_address,
        &expected.deposit_address,
    ) {
        return Err(TransferMismatch::Destination {
            expected: expected.deposit_address.clone(),
            actual: info.destination_address.clone(),
        });
    }
    if info.raw_amount < expected.raw_amount {
        return Err(TransferMismatch::Amount {
            expected: expected.raw_amount.to_string(),
            actual: info.raw_amount.to_string(),
        });
    }
    Ok(())
}

fn validate_utxo(info: &UtxoTransferInfo, expected: &ExpectedTransfer) -> Result<(), TransferMismatch> {
    let chain_type = expected.currency.chain_type();
    let paid = info.outputs.iter().any(|out| {
        addresses_match(chain_type, &out.destination_address, &expected.deposit_address)
            && out.raw_amount >= expected.raw_amount
    });
    if paid {
        Ok(())
    } else {
        Err(TransferMismatch::NoMatchingOutput {
            destination: expected.deposit_address.clone(),
            expected: expected.raw_amount.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::traits::UtxoOutput;
    use crate::currency::ChainId;

    fn expected(amount: u64) -> ExpectedTransfer {
        ExpectedTransfer {
            currency: Currency::native(ChainId::Eth),
            raw_amount: BigDecimal::from(amount),
            sender_address: "0xAbC".to_string(),
            deposit_address: "0xdep".to_string(),
        }
    }

    fn account(amount: u64) -> Transfer {
        TransferInfo {
            tx_hash: "0x1".to_string(),
            currency: Currency::native(ChainId::Eth),
            source_address: "0xabc".to_string(),
            destination_address: "0xDEP".to_string(),
            raw_amount: BigDecimal::from(amount),
            confirmed: true,
        }
        .into()
    }

    #[test]
    fn test_account_transfer_matches() {
        assert_eq!(validate_transfer(&account(100), &expected(100)), Ok(()));
        assert_eq!(validate_transfer(&account(150), &expected(100)), Ok(()));
    }

    #[test]
    fn test_account_transfer_underpaid() {
        assert!(matches!(
            validate_transfer(&account(99), &expected(100)),
            Err(TransferMismatch::Amount { .. })
        ));
    }

    #[test]
    fn test_wrong_currency_or_sender() {
        let mut exp = expected(1);
        exp.currency = Currency::native(ChainId::Base);
        assert!(matches!(
            validate_transfer(&account(1), &exp),
            Err(TransferMismatch::Currency { .. })
        ));

        let mut exp = expected(1);
        exp.sender_address = "0xother".to_string();
        assert!(matches!(
            validate_transfer(&account(1), &exp),
            Err(TransferMismatch::Sender { .. })
        ));
    }

    #[test]
    fn test_utxo_searches_all_outputs() {
        let transfer: Transfer = UtxoTransferInfo {
            tx_hash: "h".to_string(),
            currency: Currency::native(ChainId::Btc),
            source_address: "payer".to_string(),
            confirmed: true,
            outputs: vec![
                UtxoOutput { destination_address: "A".to_string(), raw_amount: BigDecimal::from(5) },
                UtxoOutput { destination_address: "B".to_string(), raw_amount: BigDecimal::from(50) },
            ],
        }
        .into();

        let mut exp = ExpectedTransfer {
            currency: Currency::native(ChainId::Btc),
            raw_amount: BigDecimal::from(50),
            sender_address: "payer".to_string(),
            deposit_address: "B".to_string(),
        };
        assert_eq!(validate_transfer(&transfer, &exp), Ok(()));

        exp.raw_amount = BigDecimal::from(60);
        assert!(matches!(
            validate_transfer(&transfer, &exp),
            Err(TransferMismatch::NoMatchingOutput { .. })
        ));
    }

    #[test]
    fn test_address_case_folding_is_evm_only() {
        assert!(addresses_match(ChainType::Evm, "0xAbC", "0xabc"));
        assert!(!addresses_match(ChainType::Sol, "So1Payer", "so1payer"));
        assert!(!addresses_match(ChainType::Utxo, "1BoatSLRHt", "1boatslrht"));
        assert!(addresses_match(ChainType::Utxo, " bc1qdep", "bc1qdep"));
    }
}
