use ethers::types::Address;
use serde::{Deserialize, Serialize};

use super::serde_flex::u64_flex;

/// A collateralized minting position as served by the indexer, augmented
/// with chain state where the indexed value can lag (collateral balance,
/// minted amount, effective interest).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub position: Address,
    pub owner: Address,
    pub collateral: Address,
    pub price: String,

    #[serde(deserialize_with = "u64_flex")]
    pub created: u64,
    pub is_original: bool,
    pub is_clone: bool,
    pub denied: bool,
    pub closed: bool,
    pub original: Address,

    pub minimum_collateral: String,
    #[serde(rename = "riskPremiumPPM")]
    pub risk_premium_ppm: u32,
    /// Lead rate plus risk premium; recomputed from the savings contract
    /// on every refresh.
    #[serde(rename = "annualInterestPPM", default)]
    pub annual_interest_ppm: u32,
    pub reserve_contribution: u32,
    #[serde(deserialize_with = "u64_flex")]
    pub start: u64,
    #[serde(deserialize_with = "u64_flex")]
    pub cooldown: u64,
    #[serde(deserialize_with = "u64_flex")]
    pub expiration: u64,
    #[serde(deserialize_with = "u64_flex")]
    pub challenge_period: u64,

    pub stablecoin_name: String,
    pub stablecoin_symbol: String,
    pub stablecoin_decimals: u8,

    pub collateral_name: String,
    pub collateral_symbol: String,
    pub collateral_decimals: u8,
    pub collateral_balance: String,

    pub limit_for_clones: String,
    pub available_for_clones: String,
    pub minted: String,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !self.closed && !self.denied
    }
}

/// One mint/repay adjustment on a position.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintingUpdate {
    pub id: String,
    pub tx_hash: String,
    #[serde(deserialize_with = "u64_flex")]
    pub created: u64,
    pub position: Address,
    pub owner: Address,
    pub is_clone: bool,
    pub collateral: Address,
    pub collateral_name: String,
    pub collateral_symbol: String,
    pub collateral_decimals: u8,
    pub size: String,
    pub price: String,
    pub minted: String,
    pub size_adjusted: String,
    pub price_adjusted: String,
    pub minted_adjusted: String,
    #[serde(rename = "annualInterestPPM")]
    pub annual_interest_ppm: u32,
    pub reserve_contribution: u32,
    #[serde(deserialize_with = "u64_flex")]
    pub fee_timeframe: u64,
    #[serde(rename = "feePPM")]
    pub fee_ppm: u32,
    pub fee_paid: String,
}
