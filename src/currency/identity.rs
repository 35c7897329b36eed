use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::amount::{self, CurrencyAmount};
use super::chain::{chain_by_id, Chain, ChainId, ChainType};
use super::error::{CurrencyError, CurrencyResult};

/// Separator between chain id and address in a canonical currency id
pub const ID_SEPARATOR: char = '-';

/// Metadata attached once a currency has been resolved through the price oracle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<BigDecimal>,
}

/// Chain-agnostic currency identity.
///
/// Two currencies are equal iff their canonical ids are equal; metadata and
/// price annotations never take part in comparison or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "CurrencyView", try_from = "CurrencyView")]
pub struct Currency {
    chain_id: ChainId,
    address: Option<String>,
    id: String,
    metadata: CurrencyMetadata,
}

impl Currency {
    /// Build a currency from a chain and an optional contract/mint address.
    ///
    /// Empty addresses mean the chain's native asset. Addresses are lowercased
    /// and may not contain the id separator.
    pub fn new(chain_id: ChainId, address: Option<&str>) -> CurrencyResult<Self> {
        let address = match address.map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                if raw.contains(ID_SEPARATOR) {
                    return Err(CurrencyError::invalid_address(
                        raw,
                        format!("address may not contain '{}'", ID_SEPARATOR),
                    ));
                }
                Some(raw.to_lowercase())
            }
        };

        let native = native_address(chain_id);
        // A missing address on a chain whose native asset has one still means native
        let address = match (address, native) {
            (None, Some(native)) => Some(native.to_string()),
            (address, _) => address,
        };

        let id = match &address {
            Some(addr) if Some(addr.as_str()) != native => {
                format!("{}{}{}", chain_id.as_u64(), ID_SEPARATOR, addr)
            }
            _ => chain_id.as_u64().to_string(),
        };

        Ok(Self {
            chain_id,
            address,
            id,
            metadata: CurrencyMetadata::default(),
        })
    }

    /// Native asset identity of a chain
    pub fn native(chain_id: ChainId) -> Self {
        let address = native_address(chain_id).map(str::to_string);
        Self {
            chain_id,
            address,
            id: chain_id.as_u64().to_string(),
            metadata: CurrencyMetadata::default(),
        }
    }

    /// Native currency of a registered chain, carrying the registry metadata
    pub fn from_chain(chain: &Chain) -> Self {
        Self::native(chain.id).with_metadata(CurrencyMetadata {
            name: Some(chain.native.name.to_string()),
            ticker: Some(chain.native.ticker.to_string()),
            decimals: Some(chain.native.decimals),
            image: Some(chain.native.image.to_string()),
            price_usd: None,
        })
    }

    /// Parse a canonical id (`"{chain_id}"` or `"{chain_id}-{address}"`)
    pub fn from_id(id: &str) -> CurrencyResult<Self> {
        let trimmed = id.trim();
        let (chain_part, address) = match trimmed.split_once(ID_SEPARATOR) {
            Some((chain, address)) => (chain, Some(address)),
            None => (trimmed, None),
        };

        let chain_id = chain_part
            .parse::<u64>()
            .ok()
            .and_then(ChainId::from_u64)
            .ok_or_else(|| CurrencyError::invalid_identifier(id))?;

        if let Some(addr) = address {
            if addr.trim().is_empty() {
                return Err(CurrencyError::invalid_identifier(id));
            }
        }

        Self::new(chain_id, address).map_err(|_| CurrencyError::invalid_identifier(id))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn chain(&self) -> Option<&'static Chain> {
        chain_by_id(self.chain_id)
    }

    pub fn chain_type(&self) -> ChainType {
        self.chain_id.chain_type()
    }

    pub fn is_native(&self) -> bool {
        self.address.as_deref() == native_address(self.chain_id)
    }

    pub fn metadata(&self) -> &CurrencyMetadata {
        &self.metadata
    }

    pub fn with_metadata(mut self, metadata: CurrencyMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_price(mut self, price_usd: BigDecimal) -> Self {
        self.metadata.price_usd = Some(price_usd);
        self
    }

    pub fn ticker(&self) -> Option<&str> {
        self.metadata.ticker.as_deref()
    }

    pub fn price_usd(&self) -> Option<&BigDecimal> {
        self.metadata.price_usd.as_ref()
    }

    pub fn decimals(&self) -> CurrencyResult<u32> {
        self.metadata
            .decimals
            .ok_or_else(|| CurrencyError::decimals_unavailable(&self.id))
    }

    pub fn require_price(&self) -> CurrencyResult<&BigDecimal> {
        self.metadata
            .price_usd
            .as_ref()
            .ok_or_else(|| CurrencyError::price_unavailable(&self.id))
    }

    /// `round(ui * 10^decimals)`
    pub fn ui_to_raw(&self, ui_amount: &BigDecimal) -> CurrencyResult<BigDecimal> {
        Ok(amount::ui_to_raw(ui_amount, self.decimals()?))
    }

    pub fn raw_to_ui(&self, raw_amount: &BigDecimal) -> CurrencyResult<BigDecimal> {
        Ok(amount::raw_to_ui(raw_amount, self.decimals()?))
    }

    /// UI amount worth `value_usd` at the attached price
    pub fn usd_to_ui(&self, value_usd: &BigDecimal) -> CurrencyResult<BigDecimal> {
        let price = self.require_price()?;
        if *price <= BigDecimal::from(0) {
            return Err(CurrencyError::price_unavailable(&self.id));
        }
        let ui = value_usd / price;
        Ok(match self.metadata.decimals {
            Some(decimals) => ui.round(decimals as i64),
            None => ui,
        })
    }

    pub fn display_precision(&self) -> u32 {
        match self.metadata.decimals {
            Some(decimals) => amount::display_precision(decimals, self.price_usd()),
            None => amount::DEFAULT_MIN_DISPLAY_PRECISION,
        }
    }

    pub fn amount_from_ui(&self, ui_amount: BigDecimal) -> CurrencyResult<CurrencyAmount> {
        CurrencyAmount::from_ui(self.clone(), ui_amount)
    }

    pub fn amount_from_raw(&self, raw_amount: BigDecimal) -> CurrencyResult<CurrencyAmount> {
        CurrencyAmount::from_raw(self.clone(), raw_amount)
    }

    pub fn amount_from_usd(&self, value_usd: BigDecimal) -> CurrencyResult<CurrencyAmount> {
        CurrencyAmount::from_usd(self.clone(), value_usd)
    }
}

fn native_address(chain_id: ChainId) -> Option<&'static str> {
    chain_by_id(chain_id).and_then(|chain| chain.native.address)
}

impl PartialEq for Currency {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Currency {}

impl Hash for Currency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::from_id(s)
    }
}

/// Wire shape of a currency
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurrencyView {
    id: String,
    #[serde(default)]
    is_native: bool,
    #[serde(flatten)]
    metadata: CurrencyMetadata,
}

impl From<Currency> for CurrencyView {
    fn from(currency: Currency) -> Self {
        Self {
            is_native: currency.is_native(),
            id: currency.id,
            metadata: currency.metadata,
        }
    }
}

impl TryFrom<CurrencyView> for Currency {
    type Error = CurrencyError;

    fn try_from(view: CurrencyView) -> Result<Self, Self::Error> {
        Ok(Currency::from_id(&view.id)?.with_metadata(view.metadata))
    }
}

/// A currency as it arrives at a boundary: either a bare id or a resolved value.
///
/// Resolved once at the boundary; the engine only ever sees `Currency`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurrencyRef {
    Id(String),
    Resolved(Currency),
}

impl CurrencyRef {
    pub fn resolve(self) -> CurrencyResult<Currency> {
        match self {
            CurrencyRef::Id(id) => Currency::from_id(&id),
            CurrencyRef::Resolved(currency) => Ok(currency),
        }
    }
}

impl From<Currency> for CurrencyRef {
    fn from(currency: Currency) -> Self {
        CurrencyRef::Resolved(currency)
    }
}

impl From<&str> for CurrencyRef {
    fn from(id: &str) -> Self {
        CurrencyRef::Id(id.to_string())
    }
}
