mod challenge;
mod ecosystem;
mod minter;
mod position;
mod price;

pub use challenge::{Bid, BidType, Challenge, ChallengeStatus};
pub use ecosystem::{
    EcosystemEntry, MintBurnEntry, PoolShareEarnings, PoolShareInfo, PoolShareReserve,
    PoolShareValues, SupplyStats,
};
pub use minter::Minter;
pub use position::{MintingUpdate, Position};
pub use price::{PriceEntry, PriceQuote, TokenInfo};

pub(crate) mod serde_flex {
    use serde::{Deserialize, Deserializer};

    // The indexer serializes GraphQL BigInt scalars as strings and Int
    // scalars as numbers; timestamp-like fields show up as either.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    pub fn u64_flex<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(n) => Ok(n),
            NumOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    pub fn u64_flex_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<NumOrStr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(NumOrStr::Num(n)) => Ok(Some(n)),
            Some(NumOrStr::Str(s)) if s.is_empty() => Ok(None),
            Some(NumOrStr::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Flexed {
        #[serde(deserialize_with = "super::serde_flex::u64_flex")]
        value: u64,
    }

    #[test]
    fn test_u64_flex_accepts_numbers_and_strings() {
        let from_num: Flexed = serde_json::from_str(r#"{"value": 42}"#).unwrap();
        let from_str: Flexed = serde_json::from_str(r#"{"value": "42"}"#).unwrap();
        assert_eq!(from_num.value, 42);
        assert_eq!(from_str.value, 42);
    }
}
