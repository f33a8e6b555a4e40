use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// ERC-20 identity the price cache is keyed over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub usd: f64,
    /// Derived opportunistically from the reference rate; absent until the
    /// reference has been quoted at least once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eur: Option<f64>,
}

impl PriceQuote {
    pub fn usd(usd: f64) -> Self {
        Self { usd, eur: None }
    }
}

/// Cached quote for one token. `timestamp == 0` marks an entry whose fetch
/// has never succeeded; such entries are stale on the very next check so
/// the engine retries them aggressively.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceEntry {
    #[serde(flatten)]
    pub token: TokenInfo,
    pub timestamp: u64,
    pub price: PriceQuote,
}

impl PriceEntry {
    pub fn is_stale(&self, now_millis: u64, ttl_millis: u64) -> bool {
        self.timestamp + ttl_millis < now_millis
    }
}
