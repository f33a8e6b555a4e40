use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::chain::ChainReader;
use crate::client::IndexerClient;
use crate::models::{MintingUpdate, Position, TokenInfo};
use crate::notify::{ChangeEvent, ChangeKind, ChangeQueue};
use crate::prices::TokenUniverse;

const POSITIONS_QUERY: &str = r#"
    query {
        positions(orderBy: "availableForClones", orderDirection: "desc", limit: 1000) {
            items {
                position
                owner
                collateral
                price

                created
                isOriginal
                isClone
                denied
                closed
                original

                minimumCollateral
                riskPremiumPPM
                reserveContribution
                start
                cooldown
                expiration
                challengePeriod

                stablecoinName
                stablecoinSymbol
                stablecoinDecimals

                collateralName
                collateralSymbol
                collateralDecimals
                collateralBalance

                limitForClones
                availableForClones
                minted
            }
        }
    }
"#;

const MINTING_UPDATES_QUERY: &str = r#"
    query {
        mintingUpdates(orderBy: "created", orderDirection: "desc", limit: 1000) {
            items {
                id
                txHash
                created
                position
                owner
                isClone
                collateral
                collateralName
                collateralSymbol
                collateralDecimals
                size
                price
                minted
                sizeAdjusted
                priceAdjusted
                mintedAdjusted
                annualInterestPPM
                reserveContribution
                feeTimeframe
                feePPM
                feePaid
            }
        }
    }
"#;

/// Synchronizes minting positions and their adjustment history.
///
/// Sole writer of the positions and minting-update caches; API handlers
/// read through the synchronous getters.
pub struct PositionsService {
    client: Arc<IndexerClient>,
    chain: Arc<ChainReader>,
    savings: Address,
    positions: SnapshotCache<Address, Position>,
    minting_updates: SnapshotCache<Address, Vec<MintingUpdate>>,
    events: Arc<ChangeQueue>,
}

impl PositionsService {
    pub fn new(
        client: Arc<IndexerClient>,
        chain: Arc<ChainReader>,
        savings: Address,
        events: Arc<ChangeQueue>,
    ) -> Self {
        Self {
            client,
            chain,
            savings,
            positions: SnapshotCache::new(),
            minting_updates: SnapshotCache::new(),
            events,
        }
    }

    pub fn list(&self) -> Vec<Position> {
        self.positions.all()
    }

    pub fn mapping(&self) -> HashMap<Address, Position> {
        self.positions.snapshot()
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    /// Positions that are neither closed nor denied.
    pub fn open(&self) -> Vec<Position> {
        self.positions.filtered(Position::is_open)
    }

    pub fn by_owner(&self) -> HashMap<Address, Vec<Position>> {
        self.positions.group_by(|p| p.owner)
    }

    pub fn minting_updates_list(&self) -> Vec<MintingUpdate> {
        self.minting_updates
            .all()
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn minting_updates_mapping(&self) -> HashMap<Address, Vec<MintingUpdate>> {
        self.minting_updates.snapshot()
    }

    /// Refresh the positions snapshot from the indexer, overwriting the
    /// fields the indexer can lag on with chain state.
    pub async fn update_positions(&self) -> anyhow::Result<()> {
        debug!("Updating positions");
        let records: Vec<Position> = self
            .client
            .fetch_items("updatePositions", POSITIONS_QUERY, "positions")
            .await?;

        if records.is_empty() {
            warn!("No positions found.");
            return Ok(());
        }

        // Collateral can be transferred and debt repaid without touching the
        // contracts the indexer watches; the chain is authoritative here.
        let balance_calls: Vec<(Address, Address)> =
            records.iter().map(|p| (p.collateral, p.position)).collect();
        let position_addrs: Vec<Address> = records.iter().map(|p| p.position).collect();

        let balances = self.chain.balance_of_many(&balance_calls).await;
        let minted = self.chain.minted_many(&position_addrs).await;

        let lead_rate = match self.chain.lead_rate_ppm(self.savings).await {
            Ok(rate) => Some(rate),
            Err(e) => {
                warn!("Lead rate read failed, keeping cached interest: {}", e);
                None
            }
        };

        let mut batch = HashMap::with_capacity(records.len());
        for (idx, mut p) in records.into_iter().enumerate() {
            match &balances[idx] {
                Ok(balance) => p.collateral_balance = balance.to_string(),
                Err(e) => debug!(
                    "Keeping indexed collateral balance for {:?}: {}",
                    p.position, e
                ),
            }
            match &minted[idx] {
                Ok(amount) => p.minted = amount.to_string(),
                Err(e) => debug!("Keeping indexed minted amount for {:?}: {}", p.position, e),
            }

            p.annual_interest_ppm = match lead_rate {
                Some(rate) => rate + p.risk_premium_ppm,
                None => self
                    .positions
                    .get(&p.position)
                    .map(|prev| prev.annual_interest_ppm)
                    .unwrap_or(p.risk_premium_ppm),
            };

            if !self.positions.contains(&p.position) {
                self.events.publish(ChangeEvent::new(
                    ChangeKind::PositionUpdated,
                    format!("{:?}", p.position),
                    format!("new position with {} collateral", p.collateral_symbol),
                ));
            }
            batch.insert(p.position, p);
        }

        let before = self.positions.len();
        self.positions.merge(batch);
        let after = self.positions.len();
        if after > before {
            info!("Positions merging, from {} to {} positions", before, after);
        }
        Ok(())
    }

    /// Refresh the per-position minting history. Each position's history
    /// vector is overwritten wholesale.
    pub async fn update_minting_updates(&self) -> anyhow::Result<()> {
        debug!("Updating minting updates");
        let records: Vec<MintingUpdate> = self
            .client
            .fetch_items("updateMintingUpdates", MINTING_UPDATES_QUERY, "mintingUpdates")
            .await?;

        if records.is_empty() {
            warn!("No minting updates found.");
            return Ok(());
        }

        let mut batch: HashMap<Address, Vec<MintingUpdate>> = HashMap::new();
        for update in records {
            batch.entry(update.position).or_default().push(update);
        }

        for (position, updates) in &batch {
            let known = self
                .minting_updates
                .get(position)
                .map(|prev| prev.len())
                .unwrap_or(0);
            if updates.len() > known {
                if let Some(latest) = updates.first() {
                    self.events.publish(ChangeEvent::new(
                        ChangeKind::MintingUpdate,
                        latest.id.clone(),
                        format!("minted {} on {:?}", latest.minted, position),
                    ));
                }
            }
        }

        let before: usize = self.minting_updates.all().iter().map(Vec::len).sum();
        self.minting_updates.merge(batch);
        let after: usize = self.minting_updates.all().iter().map(Vec::len).sum();
        if after > before {
            info!("Minting updates merging, from {} to {} entries", before, after);
        }
        Ok(())
    }
}

impl TokenUniverse for PositionsService {
    /// Distinct collateral tokens referenced by the current snapshot.
    fn collateral_tokens(&self) -> Vec<TokenInfo> {
        let mut seen: HashMap<Address, TokenInfo> = HashMap::new();
        for p in self.positions.all() {
            seen.entry(p.collateral).or_insert_with(|| TokenInfo {
                address: p.collateral,
                name: p.collateral_name.clone(),
                symbol: p.collateral_symbol.clone(),
                decimals: p.collateral_decimals,
            });
        }
        seen.into_values().collect()
    }
}
