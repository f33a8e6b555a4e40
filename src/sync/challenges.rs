use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::chain::ChainReader;
use crate::client::IndexerClient;
use crate::models::{Bid, Challenge, ChallengeStatus};
use crate::notify::{ChangeEvent, ChangeKind, ChangeQueue};

const CHALLENGES_QUERY: &str = r#"
    query {
        challenges(orderBy: "status", orderDirection: "asc", limit: 1000) {
            items {
                id
                position
                number
                challenger
                start
                created
                duration
                size
                liqPrice
                bids
                filledSize
                acquiredCollateral
                status
            }
        }
    }
"#;

const BIDS_QUERY: &str = r#"
    query {
        challengeBids(orderBy: "created", orderDirection: "desc", limit: 1000) {
            items {
                id
                position
                number
                numberBid
                bidder
                created
                bidType
                bid
                price
                filledSize
                acquiredCollateral
                challengeSize
            }
        }
    }
"#;

/// Synchronizes collateral auctions (challenges), their bids, and the
/// live auction price of every active challenge.
pub struct ChallengesService {
    client: Arc<IndexerClient>,
    chain: Arc<ChainReader>,
    auction_hub: Address,
    challenges: SnapshotCache<String, Challenge>,
    bids: SnapshotCache<String, Bid>,
    /// Challenge id -> current auction price in raw units.
    auction_prices: SnapshotCache<String, String>,
    events: Arc<ChangeQueue>,
}

impl ChallengesService {
    pub fn new(
        client: Arc<IndexerClient>,
        chain: Arc<ChainReader>,
        auction_hub: Address,
        events: Arc<ChangeQueue>,
    ) -> Self {
        Self {
            client,
            chain,
            auction_hub,
            challenges: SnapshotCache::new(),
            bids: SnapshotCache::new(),
            auction_prices: SnapshotCache::new(),
            events,
        }
    }

    pub fn challenges_list(&self) -> Vec<Challenge> {
        self.challenges.all()
    }

    pub fn challenges_mapping(&self) -> HashMap<String, Challenge> {
        self.challenges.snapshot()
    }

    pub fn by_challenger(&self) -> HashMap<Address, Vec<Challenge>> {
        self.challenges.group_by(|c| c.challenger)
    }

    pub fn by_position(&self) -> HashMap<Address, Vec<Challenge>> {
        self.challenges.group_by(|c| c.position)
    }

    pub fn auction_prices_mapping(&self) -> HashMap<String, String> {
        self.auction_prices.snapshot()
    }

    pub fn bids_list(&self) -> Vec<Bid> {
        self.bids.all()
    }

    pub fn bids_mapping(&self) -> HashMap<String, Bid> {
        self.bids.snapshot()
    }

    pub fn bids_by_bidder(&self) -> HashMap<Address, Vec<Bid>> {
        self.bids.group_by(|b| b.bidder)
    }

    pub fn bids_by_challenge(&self) -> HashMap<String, Vec<Bid>> {
        self.bids.group_by(Bid::challenge_id)
    }

    pub fn bids_by_position(&self) -> HashMap<Address, Vec<Bid>> {
        self.bids.group_by(|b| b.position)
    }

    pub async fn update_challenges(&self) -> anyhow::Result<()> {
        debug!("Updating challenges");
        let records: Vec<Challenge> = self
            .client
            .fetch_items("updateChallenges", CHALLENGES_QUERY, "challenges")
            .await?;

        if records.is_empty() {
            warn!("No challenges found.");
            return Ok(());
        }

        let mut batch = HashMap::with_capacity(records.len());
        for challenge in records {
            if !self.challenges.contains(&challenge.id) {
                self.events.publish(ChangeEvent::new(
                    ChangeKind::ChallengeOpened,
                    challenge.id.clone(),
                    format!("challenge on {:?}, size {}", challenge.position, challenge.size),
                ));
            }
            batch.insert(challenge.id.clone(), challenge);
        }

        let before = self.challenges.len();
        self.challenges.merge(batch);
        let after = self.challenges.len();
        if after > before {
            info!("Challenges merging, from {} to {} entries", before, after);
        }
        Ok(())
    }

    pub async fn update_bids(&self) -> anyhow::Result<()> {
        debug!("Updating bids");
        let records: Vec<Bid> = self
            .client
            .fetch_items("updateBids", BIDS_QUERY, "challengeBids")
            .await?;

        if records.is_empty() {
            warn!("No bids found.");
            return Ok(());
        }

        let mut batch = HashMap::with_capacity(records.len());
        for bid in records {
            if !self.bids.contains(&bid.id) {
                self.events.publish(ChangeEvent::new(
                    ChangeKind::BidTaken,
                    bid.id.clone(),
                    format!("bid {} by {:?}", bid.bid, bid.bidder),
                ));
            }
            batch.insert(bid.id.clone(), bid);
        }

        let before = self.bids.len();
        self.bids.merge(batch);
        let after = self.bids.len();
        if after > before {
            info!("Bids merging, from {} to {} entries", before, after);
        }
        Ok(())
    }

    /// Read the current auction price for every active challenge. A failed
    /// read keeps the previously cached price for that challenge.
    pub async fn update_auction_prices(&self) -> anyhow::Result<()> {
        debug!("Updating auction prices");
        let active: Vec<Challenge> = self
            .challenges
            .filtered(|c| c.status == ChallengeStatus::Active);

        if active.is_empty() {
            return Ok(());
        }

        let numbers: Vec<u64> = active.iter().map(|c| c.number).collect();
        let prices = self.chain.auction_price_many(self.auction_hub, &numbers).await;

        let mut batch = HashMap::new();
        for (challenge, price) in active.iter().zip(prices) {
            match price {
                Ok(price) => {
                    batch.insert(challenge.id.clone(), price.to_string());
                }
                Err(e) => debug!(
                    "Keeping cached auction price for '{}': {}",
                    challenge.id, e
                ),
            }
        }

        self.auction_prices.merge(batch);
        Ok(())
    }
}
