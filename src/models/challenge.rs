use ethers::types::Address;
use serde::{Deserialize, Serialize};

use super::serde_flex::u64_flex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Opened,
    Active,
    Success,
    Averted,
}

/// A collateral auction started against a position.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// `<position>-challenge-<number>`
    pub id: String,
    pub position: Address,
    #[serde(deserialize_with = "u64_flex")]
    pub number: u64,
    pub challenger: Address,
    #[serde(deserialize_with = "u64_flex")]
    pub start: u64,
    #[serde(deserialize_with = "u64_flex")]
    pub created: u64,
    #[serde(deserialize_with = "u64_flex")]
    pub duration: u64,
    pub size: String,
    pub liq_price: String,
    #[serde(deserialize_with = "u64_flex")]
    pub bids: u64,
    pub filled_size: String,
    pub acquired_collateral: String,
    pub status: ChallengeStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidType {
    Averted,
    Succeeded,
}

/// A bid taken on a running challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    /// `<position>-challenge-<number>-bid-<numberBid>`
    pub id: String,
    pub position: Address,
    #[serde(deserialize_with = "u64_flex")]
    pub number: u64,
    #[serde(deserialize_with = "u64_flex")]
    pub number_bid: u64,
    pub bidder: Address,
    #[serde(deserialize_with = "u64_flex")]
    pub created: u64,
    pub bid_type: BidType,
    pub bid: String,
    pub price: String,
    pub filled_size: String,
    pub acquired_collateral: String,
    pub challenge_size: String,
}

impl Bid {
    /// Key of the challenge this bid belongs to.
    pub fn challenge_id(&self) -> String {
        format!("{:?}-challenge-{}", self.position, self.number)
    }
}
