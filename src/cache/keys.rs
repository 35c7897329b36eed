//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod oracle {
    use super::*;
    use sha2::{Digest, Sha256};

    pub const NAMESPACE: &str = "oracle";

    /// Resolved token metadata for one currency id
    #[derive(Debug, Clone)]
    pub struct TokenInfoKey {
        pub currency_id: String,
    }

    impl TokenInfoKey {
        pub fn new(currency_id: impl Into<String>) -> Self {
            Self {
                currency_id: currency_id.into(),
            }
        }
    }

    impl fmt::Display for TokenInfoKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:token:{}", VERSION, NAMESPACE, self.currency_id)
        }
    }

    /// Spot prices for a set of oracle ids; the set is sorted, deduplicated and
    /// hashed so any request order maps to the same key
    #[derive(Debug, Clone)]
    pub struct PriceKey {
        digest: String,
    }

    impl PriceKey {
        pub fn new<I, S>(ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: AsRef<str>,
        {
            let mut ids: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
            ids.sort();
            ids.dedup();

            let mut hasher = Sha256::new();
            hasher.update(ids.join(",").as_bytes());
            Self {
                digest: hex::encode(hasher.finalize()),
            }
        }
    }

    impl fmt::Display for PriceKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:prices:{}", VERSION, NAMESPACE, self.digest)
        }
    }
}

pub mod exchange {
    use super::*;

    pub const NAMESPACE: &str = "exchange";

    /// Exchange ticker/network resolved for one currency id
    #[derive(Debug, Clone)]
    pub struct CurrencyLookupKey {
        pub currency_id: String,
    }

    impl CurrencyLookupKey {
        pub fn new(currency_id: impl Into<String>) -> Self {
            Self {
                currency_id: currency_id.into(),
            }
        }
    }

    impl fmt::Display for CurrencyLookupKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:currency:{}", VERSION, NAMESPACE, self.currency_id)
        }
    }

    /// The exchange's full list of active currencies
    #[derive(Debug, Clone, Default)]
    pub struct CurrencyListKey;

    impl fmt::Display for CurrencyListKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:currencies", VERSION, NAMESPACE)
        }
    }
}
