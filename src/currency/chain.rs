//! Chain identifiers and the static chain registry
//!
//! - `ChainId`: every enumerated network, serialized as its numeric id
//! - `ChainType`: the adapter family a chain is dispatched to
//! - `Chain`: registry entry with native currency data and per-service aliases

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::error::CurrencyError;

/// Enumerated blockchain network identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainId {
    // EVM mainnets
    Eth,
    Optimism,
    Bsc,
    Polygon,
    Fantom,
    ZkSync,
    Base,
    Arbitrum,
    Avalanche,
    Blast,
    // EVM testnets
    Sepolia,
    SepoliaBase,
    SepoliaArbitrum,
    SepoliaOptimism,
    // UTXO
    Btc,
    Bch,
    Ltc,
    Doge,
    // Other
    Sol,
    Sui,
    Tron,
    Xrpl,
}

impl ChainId {
    pub const ALL: [ChainId; 22] = [
        ChainId::Eth,
        ChainId::Optimism,
        ChainId::Bsc,
        ChainId::Polygon,
        ChainId::Fantom,
        ChainId::ZkSync,
        ChainId::Base,
        ChainId::Arbitrum,
        ChainId::Avalanche,
        ChainId::Blast,
        ChainId::Sepolia,
        ChainId::SepoliaBase,
        ChainId::SepoliaArbitrum,
        ChainId::SepoliaOptimism,
        ChainId::Btc,
        ChainId::Bch,
        ChainId::Ltc,
        ChainId::Doge,
        ChainId::Sol,
        ChainId::Sui,
        ChainId::Tron,
        ChainId::Xrpl,
    ];

    /// Numeric id used on the wire and inside currency ids
    pub fn as_u64(&self) -> u64 {
        match self {
            ChainId::Eth => 1,
            ChainId::Optimism => 10,
            ChainId::Bsc => 56,
            ChainId::Polygon => 137,
            ChainId::Fantom => 250,
            ChainId::ZkSync => 324,
            ChainId::Base => 8453,
            ChainId::Arbitrum => 42161,
            ChainId::Avalanche => 43114,
            ChainId::Blast => 81457,
            ChainId::Sepolia => 11155111,
            ChainId::SepoliaBase => 84532,
            ChainId::SepoliaArbitrum => 421614,
            ChainId::SepoliaOptimism => 11155420,
            ChainId::Btc => 20000000000001,
            ChainId::Bch => 20000000000002,
            ChainId::Ltc => 20000000000003,
            ChainId::Doge => 20000000000004,
            ChainId::Sol => 30000000000001,
            ChainId::Sui => 30000000000002,
            ChainId::Tron => 30000000000003,
            ChainId::Xrpl => 30000000000004,
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.as_u64() == value)
    }

    /// Adapter family, known for every enumerated chain even when unregistered
    pub fn chain_type(&self) -> ChainType {
        match self {
            ChainId::Btc | ChainId::Bch | ChainId::Ltc | ChainId::Doge => ChainType::Utxo,
            ChainId::Sol => ChainType::Sol,
            ChainId::Sui => ChainType::Sui,
            ChainId::Tron => ChainType::Tron,
            // XRPL has no adapter family of its own yet
            ChainId::Xrpl => ChainType::Utxo,
            _ => ChainType::Evm,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

impl FromStr for ChainId {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .ok()
            .and_then(ChainId::from_u64)
            .ok_or_else(|| CurrencyError::invalid_identifier(s))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_u64())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        ChainId::from_u64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown chain id {}", value)))
    }
}

/// ChainType enumeration for adapter dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainType {
    Evm,
    Sol,
    Sui,
    Tron,
    Utxo,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Evm => "EVM",
            ChainType::Sol => "SOL",
            ChainType::Sui => "SUI",
            ChainType::Tron => "TRON",
            ChainType::Utxo => "UTXO",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "evm" | "ethereum" => Some(ChainType::Evm),
            "sol" | "solana" => Some(ChainType::Sol),
            "sui" => Some(ChainType::Sui),
            "tron" => Some(ChainType::Tron),
            "utxo" | "bitcoin" | "btc" => Some(ChainType::Utxo),
            _ => None,
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// External services that name chains their own way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    CoinGecko,
    ChangeNow,
    Alchemy,
}

/// Native asset of a registered chain
#[derive(Debug, Clone, Copy)]
pub struct NativeCurrency {
    pub name: &'static str,
    pub ticker: &'static str,
    pub decimals: u32,
    pub image: &'static str,
    /// Address the chain uses for its native asset, if any (Sui coin type)
    pub address: Option<&'static str>,
    /// Price oracle coin id
    pub coingecko_id: &'static str,
    /// Bridging exchange ticker
    pub changenow_ticker: &'static str,
}

/// Registry entry for a supported chain
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub id: ChainId,
    pub name: &'static str,
    pub chain_type: ChainType,
    pub native: NativeCurrency,
    pub image: &'static str,
    aliases: &'static [(ServiceType, &'static str)],
}

impl Chain {
    /// Chain name as known by an external service
    pub fn alias(&self, service: ServiceType) -> Option<&'static str> {
        self.aliases
            .iter()
            .find(|(s, _)| *s == service)
            .map(|(_, alias)| *alias)
    }
}

const ETH_IMAGE: &str = "https://cryptologos.cc/logos/ethereum-eth-logo.png";

const fn ether(coingecko_id: &'static str) -> NativeCurrency {
    NativeCurrency {
        name: "Ether",
        ticker: "ETH",
        decimals: 18,
        image: ETH_IMAGE,
        address: None,
        coingecko_id,
        changenow_ticker: "eth",
    }
}

static CHAINS: [Chain; 9] = [
    Chain {
        id: ChainId::Btc,
        name: "Bitcoin",
        chain_type: ChainType::Utxo,
        native: NativeCurrency {
            name: "Bitcoin",
            ticker: "BTC",
            decimals: 8,
            image: "https://cryptologos.cc/logos/bitcoin-btc-logo.png",
            address: None,
            coingecko_id: "bitcoin",
            changenow_ticker: "btc",
        },
        image: "https://cryptologos.cc/logos/bitcoin-btc-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "bitcoin"),
            (ServiceType::ChangeNow, "btc"),
        ],
    },
    Chain {
        id: ChainId::Eth,
        name: "Ethereum",
        chain_type: ChainType::Evm,
        native: ether("ethereum"),
        image: ETH_IMAGE,
        aliases: &[
            (ServiceType::CoinGecko, "ethereum"),
            (ServiceType::ChangeNow, "eth"),
            (ServiceType::Alchemy, "eth-mainnet"),
        ],
    },
    Chain {
        id: ChainId::Base,
        name: "Base",
        chain_type: ChainType::Evm,
        native: ether("ethereum"),
        image: "https://basescan.org/assets/base/images/svg/logos/chain-light.svg",
        aliases: &[
            (ServiceType::CoinGecko, "base"),
            (ServiceType::ChangeNow, "base"),
            (ServiceType::Alchemy, "base-mainnet"),
        ],
    },
    Chain {
        id: ChainId::Arbitrum,
        name: "Arbitrum One",
        chain_type: ChainType::Evm,
        native: ether("ethereum"),
        image: "https://cryptologos.cc/logos/arbitrum-arb-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "arbitrum-one"),
            (ServiceType::ChangeNow, "arbitrum"),
            (ServiceType::Alchemy, "arb-mainnet"),
        ],
    },
    Chain {
        id: ChainId::Optimism,
        name: "Optimism",
        chain_type: ChainType::Evm,
        native: ether("ethereum"),
        image: "https://cryptologos.cc/logos/optimism-ethereum-op-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "optimistic-ethereum"),
            (ServiceType::ChangeNow, "op"),
            (ServiceType::Alchemy, "opt-mainnet"),
        ],
    },
    Chain {
        id: ChainId::Polygon,
        name: "Polygon",
        chain_type: ChainType::Evm,
        native: NativeCurrency {
            name: "POL",
            ticker: "POL",
            decimals: 18,
            image: "https://cryptologos.cc/logos/polygon-matic-logo.png",
            address: None,
            coingecko_id: "polygon-ecosystem-token",
            changenow_ticker: "pol",
        },
        image: "https://cryptologos.cc/logos/polygon-matic-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "polygon-pos"),
            (ServiceType::ChangeNow, "matic"),
            (ServiceType::Alchemy, "polygon-mainnet"),
        ],
    },
    Chain {
        id: ChainId::Bsc,
        name: "Binance Smart Chain",
        chain_type: ChainType::Evm,
        native: NativeCurrency {
            name: "BNB",
            ticker: "BNB",
            decimals: 18,
            image: "https://cryptologos.cc/logos/bnb-bnb-logo.png",
            address: None,
            coingecko_id: "binancecoin",
            changenow_ticker: "bnb",
        },
        image: "https://cryptologos.cc/logos/bnb-bnb-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "binance-smart-chain"),
            (ServiceType::ChangeNow, "bsc"),
        ],
    },
    Chain {
        id: ChainId::Sol,
        name: "Solana",
        chain_type: ChainType::Sol,
        native: NativeCurrency {
            name: "SOL",
            ticker: "SOL",
            decimals: 9,
            image: "https://cryptologos.cc/logos/solana-sol-logo.png",
            address: None,
            coingecko_id: "solana",
            changenow_ticker: "sol",
        },
        image: "https://cryptologos.cc/logos/solana-sol-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "solana"),
            (ServiceType::ChangeNow, "sol"),
        ],
    },
    Chain {
        id: ChainId::Sui,
        name: "Sui",
        chain_type: ChainType::Sui,
        native: NativeCurrency {
            name: "SUI",
            ticker: "SUI",
            decimals: 9,
            image: "https://cryptologos.cc/logos/sui-sui-logo.png",
            address: Some("0x2::sui::sui"),
            coingecko_id: "sui",
            changenow_ticker: "sui",
        },
        image: "https://cryptologos.cc/logos/sui-sui-logo.png",
        aliases: &[
            (ServiceType::CoinGecko, "sui"),
            (ServiceType::ChangeNow, "sui"),
        ],
    },
];

/// Look up a registered chain
pub fn chain_by_id(id: ChainId) -> Option<&'static Chain> {
    CHAINS.iter().find(|c| c.id == id)
}

pub fn chains_by_type(chain_type: ChainType) -> Vec<&'static Chain> {
    CHAINS
        .iter()
        .filter(|c| c.chain_type == chain_type)
        .collect()
}

/// Case-insensitive lookup by display name
pub fn chain_by_name(name: &str) -> Option<&'static Chain> {
    CHAINS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn all_chains() -> &'static [Chain] {
    &CHAINS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_numeric_round_trip() {
        for id in ChainId::ALL {
            assert_eq!(ChainId::from_u64(id.as_u64()), Some(id));
        }
        assert_eq!(ChainId::from_u64(999), None);
    }

    #[test]
    fn test_chain_id_from_str() {
        assert_eq!("8453".parse::<ChainId>(), Ok(ChainId::Base));
        assert_eq!("30000000000002".parse::<ChainId>(), Ok(ChainId::Sui));
        assert!("abc".parse::<ChainId>().is_err());
        assert!("7".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_chain_id_serde_as_number() {
        let json = serde_json::to_string(&ChainId::Btc).unwrap();
        assert_eq!(json, "20000000000001");
        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChainId::Btc);
        assert!(serde_json::from_str::<ChainId>("12").is_err());
    }

    #[test]
    fn test_chain_type_from_str() {
        assert_eq!(ChainType::from_str("evm"), Some(ChainType::Evm));
        assert_eq!(ChainType::from_str("SOLANA"), Some(ChainType::Sol));
        assert_eq!(ChainType::from_str("btc"), Some(ChainType::Utxo));
        assert_eq!(ChainType::from_str("cosmos"), None);
    }

    #[test]
    fn test_registry_entries_match_their_type() {
        for chain in all_chains() {
            assert_eq!(chain.id.chain_type(), chain.chain_type, "{}", chain.name);
        }
    }

    #[test]
    fn test_registry_queries() {
        let evm = chains_by_type(ChainType::Evm);
        assert!(evm.iter().any(|c| c.id == ChainId::Eth));
        assert!(evm.iter().all(|c| c.chain_type == ChainType::Evm));

        assert_eq!(chain_by_name("solana").map(|c| c.id), Some(ChainId::Sol));
        assert!(chain_by_id(ChainId::Tron).is_none());
    }

    #[test]
    fn test_service_aliases() {
        let base = chain_by_id(ChainId::Base).unwrap();
        assert_eq!(base.alias(ServiceType::Alchemy), Some("base-mainnet"));
        assert_eq!(base.alias(ServiceType::ChangeNow), Some("base"));

        let btc = chain_by_id(ChainId::Btc).unwrap();
        assert_eq!(btc.alias(ServiceType::Alchemy), None);
    }
}
