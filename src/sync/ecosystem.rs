use ethers::types::{Address, U256};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::SnapshotCache;
use crate::chain::{to_f64, ChainReader};
use crate::client::IndexerClient;
use crate::models::{
    EcosystemEntry, MintBurnEntry, PoolShareEarnings, PoolShareInfo, PoolShareReserve,
    PoolShareValues, SupplyStats,
};

const KEY_VALUES_QUERY: &str = r#"
    query {
        ecosystems(orderBy: "id") {
            items {
                id
                value
                amount
            }
        }
    }
"#;

const MINT_BURN_QUERY: &str = r#"
    query {
        mintBurnAddressMappers(orderBy: "id", limit: 1000) {
            items {
                id
                mint
                burn
            }
        }
    }
"#;

const POOL_SHARE_QUERY: &str = r#"
    query {
        poolShares(orderBy: "id", limit: 1000) {
            items {
                id
                profits
                loss
            }
        }
    }
"#;

#[derive(Deserialize)]
struct PoolShareRecord {
    #[allow(dead_code)]
    id: String,
    profits: String,
    loss: String,
}

/// Synchronizes ecosystem-wide counters, the per-address mint/burn
/// mapping, and the pool-share token snapshot.
pub struct EcosystemService {
    client: Arc<IndexerClient>,
    chain: Arc<ChainReader>,
    stablecoin: Address,
    equity: Address,
    key_values: SnapshotCache<String, EcosystemEntry>,
    mint_burn: SnapshotCache<Address, MintBurnEntry>,
    pool_share: RwLock<Option<PoolShareInfo>>,
}

impl EcosystemService {
    pub fn new(
        client: Arc<IndexerClient>,
        chain: Arc<ChainReader>,
        stablecoin: Address,
        equity: Address,
    ) -> Self {
        Self {
            client,
            chain,
            stablecoin,
            equity,
            key_values: SnapshotCache::new(),
            mint_burn: SnapshotCache::new(),
            pool_share: RwLock::new(None),
        }
    }

    pub fn key_values(&self) -> HashMap<String, EcosystemEntry> {
        self.key_values.snapshot()
    }

    pub fn mint_burn_mapping(&self) -> HashMap<Address, MintBurnEntry> {
        self.mint_burn.snapshot()
    }

    pub fn pool_share_info(&self) -> Option<PoolShareInfo> {
        *self.pool_share.read()
    }

    /// Supply totals derived from the well-known counters; computed on
    /// read like every other snapshot view.
    pub fn supply_stats(&self) -> SupplyStats {
        let raw_mint = self.counter_amount("Stablecoin:Mint");
        let raw_burn = self.counter_amount("Stablecoin:Burn");
        let mint = raw_amount_to_f64(&raw_mint);
        let burn = raw_amount_to_f64(&raw_burn);

        SupplyStats {
            mint,
            burn,
            supply: mint - burn,
            raw_mint,
            raw_burn,
            mint_counter: self.counter_amount("Stablecoin:MintCounter").parse().unwrap_or(0),
            burn_counter: self.counter_amount("Stablecoin:BurnCounter").parse().unwrap_or(0),
        }
    }

    fn counter_amount(&self, key: &str) -> String {
        self.key_values
            .get(&key.to_string())
            .map(|entry| entry.amount)
            .unwrap_or_else(|| "0".to_string())
    }

    pub async fn update_key_values(&self) -> anyhow::Result<()> {
        debug!("Updating ecosystem key values");
        let records: Vec<EcosystemEntry> = self
            .client
            .fetch_items("updateEcosystemKeyValues", KEY_VALUES_QUERY, "ecosystems")
            .await?;

        if records.is_empty() {
            warn!("No ecosystem data found.");
            return Ok(());
        }

        let batch: HashMap<String, EcosystemEntry> = records
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        self.key_values.merge(batch);
        Ok(())
    }

    pub async fn update_mint_burn_mapping(&self) -> anyhow::Result<()> {
        debug!("Updating mint/burn mapping");
        let records: Vec<MintBurnEntry> = self
            .client
            .fetch_items(
                "updateMintBurnMapping",
                MINT_BURN_QUERY,
                "mintBurnAddressMappers",
            )
            .await?;

        if records.is_empty() {
            warn!("No mint/burn data found.");
            return Ok(());
        }

        let batch: HashMap<Address, MintBurnEntry> =
            records.into_iter().map(|entry| (entry.id, entry)).collect();
        self.mint_burn.merge(batch);
        Ok(())
    }

    /// Rebuild the pool-share snapshot from chain state plus the indexer's
    /// profit/loss record. All four chain reads run concurrently.
    pub async fn update_pool_share(&self) -> anyhow::Result<()> {
        debug!("Updating pool share info");

        let (price, total_supply, minter_reserve, reserve_balance) = tokio::join!(
            self.chain.equity_price(self.equity),
            self.chain.equity_total_supply(self.equity),
            self.chain.minter_reserve(self.stablecoin),
            self.chain.stablecoin_balance(self.stablecoin, self.equity),
        );
        let price = to_f64(price?, 18);
        let total_supply = to_f64(total_supply?, 18);
        let minter_reserve = minter_reserve?;
        let reserve_balance = reserve_balance?;

        let records: Vec<PoolShareRecord> = self
            .client
            .fetch_items("updatePoolShare", POOL_SHARE_QUERY, "poolShares")
            .await?;
        let earnings = match records.first() {
            Some(record) => PoolShareEarnings {
                profit: raw_amount_to_f64(&record.profits),
                loss: raw_amount_to_f64(&record.loss),
            },
            None => {
                warn!("No pool share earnings found.");
                PoolShareEarnings::default()
            }
        };

        let equity_in_reserve = reserve_balance.saturating_sub(minter_reserve);
        let info = PoolShareInfo {
            earnings,
            values: PoolShareValues {
                price,
                total_supply,
                market_cap: price * total_supply,
            },
            reserve: PoolShareReserve {
                balance: to_f64(reserve_balance, 18),
                equity: to_f64(equity_in_reserve, 18),
                minter: to_f64(minter_reserve, 18),
            },
        };

        *self.pool_share.write() = Some(info);
        Ok(())
    }
}

fn raw_amount_to_f64(raw: &str) -> f64 {
    U256::from_dec_str(raw)
        .map(|value| to_f64(value, 18))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_amount_to_f64() {
        assert!((raw_amount_to_f64("2500000000000000000") - 2.5).abs() < 1e-12);
        assert_eq!(raw_amount_to_f64("not-a-number"), 0.0);
        assert_eq!(raw_amount_to_f64("0"), 0.0);
    }
}
