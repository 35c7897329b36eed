//! Currency identity and amount model
//!
//! Pure value types shared by every other component. A currency is identified
//! by its canonical id (`"{chain_id}"` for natives, `"{chain_id}-{address}"` for
//! tokens); amounts convert between raw units, UI units and USD.

pub mod amount;
pub mod chain;
pub mod error;
pub mod identity;

pub use amount::{CurrencyAmount, CurrencyToCurrencyQuote, DEFAULT_MIN_DISPLAY_PRECISION};
pub use chain::{
    all_chains, chain_by_id, chain_by_name, chains_by_type, Chain, ChainId, ChainType,
    NativeCurrency, ServiceType,
};
pub use error::{CurrencyError, CurrencyResult};
pub use identity::{Currency, CurrencyMetadata, CurrencyRef, ID_SEPARATOR};
