use ethers::types::Address;
use serde::{Deserialize, Serialize};

use super::serde_flex::{u64_flex, u64_flex_opt};

/// A minter module proposal, possibly denied or vetoed later.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Minter {
    pub id: Address,
    pub tx_hash: String,
    pub minter: Address,
    #[serde(deserialize_with = "u64_flex")]
    pub application_period: u64,
    pub application_fee: String,
    pub apply_message: String,
    #[serde(deserialize_with = "u64_flex")]
    pub apply_date: u64,
    pub suggestor: Address,
    #[serde(default)]
    pub deny_message: Option<String>,
    #[serde(default, deserialize_with = "u64_flex_opt")]
    pub deny_date: Option<u64>,
    #[serde(default)]
    pub deny_tx_hash: Option<String>,
    #[serde(default)]
    pub vetor: Option<Address>,
}

impl Minter {
    pub fn is_denied(&self) -> bool {
        self.deny_date.is_some()
    }
}
