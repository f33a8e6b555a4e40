mod sources;

pub use sources::{DerivedSource, MarketDataSource, OracleFeed, OracleSource, PriceSource};

use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::SnapshotCache;
use crate::models::{PriceEntry, PriceQuote, TokenInfo};
use crate::utils::now_millis;

/// Supplies the set of collateral tokens the price cache must track.
/// Implemented by the positions synchronizer; stubbed in tests.
pub trait TokenUniverse: Send + Sync {
    fn collateral_tokens(&self) -> Vec<TokenInfo>;
}

const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Per-token price cache with TTL expiry and ordered source resolution.
///
/// Tracked tokens are the stablecoin, the pool-share token, and every
/// collateral currently referenced by the positions snapshot. A refresh
/// pass fetches cold entries immediately, refetches entries older than
/// the TTL, and skips fresh ones; the secondary-currency derivation runs
/// on every pass regardless of TTL so it can catch up as soon as the
/// reference rate is available.
pub struct PriceService {
    cache: Arc<SnapshotCache<Address, PriceEntry>>,
    sources: Vec<Arc<dyn PriceSource>>,
    universe: Arc<dyn TokenUniverse>,
    stablecoin: TokenInfo,
    pool_share: TokenInfo,
    ttl: u64,
}

impl PriceService {
    pub fn new(
        cache: Arc<SnapshotCache<Address, PriceEntry>>,
        sources: Vec<Arc<dyn PriceSource>>,
        universe: Arc<dyn TokenUniverse>,
        stablecoin: TokenInfo,
        pool_share: TokenInfo,
    ) -> Self {
        Self {
            cache,
            sources,
            universe,
            stablecoin,
            pool_share,
            ttl: DEFAULT_TTL.as_millis() as u64,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.as_millis() as u64;
        self
    }

    pub fn get_price(&self, token: &Address) -> Option<PriceEntry> {
        self.cache.get(token)
    }

    pub fn get_prices(&self) -> Vec<PriceEntry> {
        self.cache.all()
    }

    pub fn get_prices_mapping(&self) -> HashMap<Address, PriceEntry> {
        self.cache.snapshot()
    }

    /// USD quote of the stablecoin, the reference for secondary-currency
    /// derivation. `None` until it has been fetched successfully once.
    pub fn get_secondary_rate(&self) -> Option<f64> {
        let entry = self.cache.get(&self.stablecoin.address)?;
        if entry.timestamp == 0 || entry.price.usd <= 0.0 {
            return None;
        }
        Some(entry.price.usd)
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        self.refresh_at(now_millis()).await;
        Ok(())
    }

    pub(crate) async fn refresh_at(&self, now: u64) {
        let tokens = self.tracked_tokens();
        if tokens.is_empty() {
            debug!("No positions yet, skipping price refresh");
            return;
        }

        let mut batch: HashMap<Address, PriceEntry> = HashMap::new();
        let mut new_attempted = 0u32;
        let mut new_failed = 0u32;
        let mut stale_attempted = 0u32;
        let mut stale_failed = 0u32;

        for token in &tokens {
            match self.cache.get(&token.address) {
                None => {
                    new_attempted += 1;
                    debug!("Price for {} not cached yet, fetching", token.name);
                    match self.resolve(token).await {
                        Some(quote) => {
                            batch.insert(
                                token.address,
                                PriceEntry {
                                    token: token.clone(),
                                    timestamp: now,
                                    price: quote,
                                },
                            );
                        }
                        None => {
                            new_failed += 1;
                            // Placeholder with a zero timestamp: stale on the
                            // very next pass, so never-priced tokens retry
                            // aggressively.
                            batch.insert(
                                token.address,
                                PriceEntry {
                                    token: token.clone(),
                                    timestamp: 0,
                                    price: PriceQuote::usd(1.0),
                                },
                            );
                        }
                    }
                }
                Some(entry) if entry.is_stale(now, self.ttl) => {
                    stale_attempted += 1;
                    debug!("Price for {} out of date, fetching", token.name);
                    match self.resolve(token).await {
                        Some(quote) => {
                            batch.insert(
                                token.address,
                                PriceEntry {
                                    token: token.clone(),
                                    timestamp: now,
                                    price: quote,
                                },
                            );
                        }
                        None => stale_failed += 1,
                    }
                }
                Some(_) => {}
            }
        }

        if new_attempted + stale_attempted > 0 {
            info!(
                "Prices merging, from new {} / {}, from update {} / {}",
                new_attempted - new_failed,
                new_attempted,
                stale_attempted - stale_failed,
                stale_attempted
            );
        }
        self.cache.merge(batch);

        self.derive_secondary();
    }

    fn tracked_tokens(&self) -> Vec<TokenInfo> {
        let collaterals = self.universe.collateral_tokens();
        if collaterals.is_empty() {
            return Vec::new();
        }
        let mut tokens = vec![self.pool_share.clone(), self.stablecoin.clone()];
        tokens.extend(collaterals);
        tokens
    }

    async fn resolve(&self, token: &TokenInfo) -> Option<PriceQuote> {
        for source in &self.sources {
            if let Some(quote) = source.fetch(token).await {
                debug!("Price for {} resolved via {}", token.symbol, source.name());
                return Some(quote);
            }
        }
        None
    }

    /// Derive every entry's secondary-currency price from the reference
    /// rate. Timestamps are untouched: the derivation is independent of
    /// each entry's own TTL.
    fn derive_secondary(&self) {
        let Some(reference) = self.get_secondary_rate() else {
            return;
        };

        let mut updated = HashMap::new();
        for (address, mut entry) in self.cache.snapshot() {
            if entry.price.usd <= 0.0 {
                continue;
            }
            let eur = (entry.price.usd / reference * 100.0).round() / 100.0;
            if entry.price.eur != Some(eur) {
                entry.price.eur = Some(eur);
                updated.insert(address, entry);
            }
        }
        self.cache.merge(updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubUniverse {
        tokens: Vec<TokenInfo>,
    }

    impl TokenUniverse for StubUniverse {
        fn collateral_tokens(&self) -> Vec<TokenInfo> {
            self.tokens.clone()
        }
    }

    struct StubSource {
        quote: Option<f64>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for StubSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch(&self, _token: &TokenInfo) -> Option<PriceQuote> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.quote.map(PriceQuote::usd)
        }
    }

    fn token(byte: u8, symbol: &str) -> TokenInfo {
        TokenInfo {
            address: Address::repeat_byte(byte),
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            decimals: 18,
        }
    }

    fn service(quote: Option<f64>) -> (PriceService, Arc<StubSource>) {
        let source = Arc::new(StubSource {
            quote,
            fetches: AtomicUsize::new(0),
        });
        let universe = Arc::new(StubUniverse {
            tokens: vec![token(0x33, "WETH")],
        });
        let service = PriceService::new(
            Arc::new(SnapshotCache::new()),
            vec![source.clone()],
            universe,
            token(0x11, "dEURO"),
            token(0x22, "DEPS"),
        );
        (service, source)
    }

    #[tokio::test]
    async fn test_price_ttl_boundaries() {
        let (service, source) = service(Some(2.0));
        let t0 = 1_700_000_000_000;
        let ttl = 300_000;

        service.refresh_at(t0).await;
        let fetched = source.fetches.load(Ordering::SeqCst);
        assert_eq!(fetched, 3); // pool share, stablecoin, one collateral

        // Within the TTL nothing is refetched
        service.refresh_at(t0 + ttl - 1).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), fetched);

        // Past the TTL everything is refetched
        service.refresh_at(t0 + ttl + 1).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), fetched * 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_retries_on_next_pass() {
        let (service, source) = service(None);
        let t0 = 1_700_000_000_000;

        service.refresh_at(t0).await;
        let entry = service
            .get_price(&Address::repeat_byte(0x33))
            .expect("placeholder entry");
        assert_eq!(entry.timestamp, 0);
        assert_eq!(entry.price.usd, 1.0);

        // One poll later the zero-timestamp entry counts as stale
        let before = source.fetches.load(Ordering::SeqCst);
        service.refresh_at(t0 + 1).await;
        assert!(source.fetches.load(Ordering::SeqCst) > before);
    }

    #[tokio::test]
    async fn test_secondary_currency_derivation() {
        let (service, _source) = service(Some(2.4));
        let t0 = 1_700_000_000_000;

        // Stablecoin and collateral both quote 2.4 USD; the reference rate
        // is therefore 2.4 and every EUR price lands at 1.0.
        service.refresh_at(t0).await;
        assert_eq!(service.get_secondary_rate(), Some(2.4));

        let entry = service.get_price(&Address::repeat_byte(0x33)).unwrap();
        assert_eq!(entry.price.eur, Some(1.0));
        // Derivation does not touch the freshness timestamp
        assert_eq!(entry.timestamp, t0);
    }

    #[tokio::test]
    async fn test_no_refresh_without_positions() {
        let source = Arc::new(StubSource {
            quote: Some(1.0),
            fetches: AtomicUsize::new(0),
        });
        let universe = Arc::new(StubUniverse { tokens: vec![] });
        let service = PriceService::new(
            Arc::new(SnapshotCache::new()),
            vec![source.clone()],
            universe,
            token(0x11, "dEURO"),
            token(0x22, "DEPS"),
        );

        service.refresh_at(1_700_000_000_000).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
        assert!(service.get_prices().is_empty());
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let first = Arc::new(StubSource {
            quote: Some(10.0),
            fetches: AtomicUsize::new(0),
        });
        let second = Arc::new(StubSource {
            quote: Some(99.0),
            fetches: AtomicUsize::new(0),
        });
        let universe = Arc::new(StubUniverse {
            tokens: vec![token(0x33, "WETH")],
        });
        let service = PriceService::new(
            Arc::new(SnapshotCache::new()),
            vec![first.clone(), second.clone()],
            universe,
            token(0x11, "dEURO"),
            token(0x22, "DEPS"),
        );

        service.refresh_at(1_700_000_000_000).await;
        let entry = service.get_price(&Address::repeat_byte(0x33)).unwrap();
        assert_eq!(entry.price.usd, 10.0);
        assert_eq!(second.fetches.load(Ordering::SeqCst), 0);
    }
}
