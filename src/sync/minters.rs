use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::client::IndexerClient;
use crate::models::Minter;
use crate::notify::{ChangeEvent, ChangeKind, ChangeQueue};

const MINTERS_QUERY: &str = r#"
    query {
        minters(orderBy: "id", limit: 1000) {
            items {
                id
                txHash
                minter
                applicationPeriod
                applicationFee
                applyMessage
                applyDate
                suggestor
                denyMessage
                denyDate
                denyTxHash
                vetor
            }
        }
    }
"#;

/// Synchronizes minter module proposals.
pub struct MintersService {
    client: Arc<IndexerClient>,
    minters: SnapshotCache<Address, Minter>,
    events: Arc<ChangeQueue>,
}

impl MintersService {
    pub fn new(client: Arc<IndexerClient>, events: Arc<ChangeQueue>) -> Self {
        Self {
            client,
            minters: SnapshotCache::new(),
            events,
        }
    }

    pub fn list(&self) -> Vec<Minter> {
        self.minters.all()
    }

    pub fn mapping(&self) -> HashMap<Address, Minter> {
        self.minters.snapshot()
    }

    pub async fn update_minters(&self) -> anyhow::Result<()> {
        debug!("Updating minters");
        let records: Vec<Minter> = self
            .client
            .fetch_items("updateMinters", MINTERS_QUERY, "minters")
            .await?;

        if records.is_empty() {
            warn!("No minters found.");
            return Ok(());
        }

        let mut batch = HashMap::with_capacity(records.len());
        for minter in records {
            if !self.minters.contains(&minter.id) {
                self.events.publish(ChangeEvent::new(
                    ChangeKind::MinterProposed,
                    format!("{:?}", minter.id),
                    format!("proposed by {:?}", minter.suggestor),
                ));
            }
            batch.insert(minter.id, minter);
        }

        let before = self.minters.len();
        self.minters.merge(batch);
        let after = self.minters.len();
        if after != before {
            info!("Minters merging, from {} to {} entries", before, after);
        }
        Ok(())
    }
}
