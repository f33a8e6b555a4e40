use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Raw indexer key/value counter, e.g. `Stablecoin:Mint`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcosystemEntry {
    pub id: String,
    pub value: String,
    pub amount: String,
}

/// Per-address accumulated mint and burn amounts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintBurnEntry {
    pub id: Address,
    pub mint: String,
    pub burn: String,
}

/// Supply totals derived from the well-known ecosystem counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SupplyStats {
    pub mint: f64,
    pub burn: f64,
    pub supply: f64,
    pub raw_mint: String,
    pub raw_burn: String,
    pub mint_counter: u64,
    pub burn_counter: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PoolShareEarnings {
    pub profit: f64,
    pub loss: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PoolShareValues {
    /// Share price in base-currency units, straight from the equity contract.
    pub price: f64,
    pub total_supply: f64,
    pub market_cap: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PoolShareReserve {
    pub balance: f64,
    pub equity: f64,
    pub minter: f64,
}

/// Snapshot of the pool-share token, built from chain reads plus the
/// indexer's profit/loss record.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PoolShareInfo {
    pub earnings: PoolShareEarnings,
    pub values: PoolShareValues,
    pub reserve: PoolShareReserve,
}
