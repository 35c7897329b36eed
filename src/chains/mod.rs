//! Chain adapters and the balance/transfer aggregator
//!
//! Each adapter reads one chain family (EVM, Solana, Sui, UTXO) and normalizes
//! balances and transfers into the shared types in [`traits`].

pub mod aggregator;
pub mod error;
pub mod evm;
pub mod rpc;
pub mod solana;
pub mod sui;
pub mod traits;
pub mod utxo;
pub mod validate;

pub use aggregator::ChainAggregator;
pub use error::{ChainError, ChainResult};
pub use traits::{Balance, ChainAdapter, Transfer, TransferInfo, UtxoOutput, UtxoTransferInfo};
pub use validate::{validate_transfer, ExpectedTransfer, TransferMismatch};
