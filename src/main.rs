use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use stablecoin_api::cache::SnapshotCache;
use stablecoin_api::chain::ChainReader;
use stablecoin_api::client::IndexerClient;
use stablecoin_api::config::Config;
use stablecoin_api::notify::{ChangeQueue, Dispatcher, LogNotifier};
use stablecoin_api::prices::{
    DerivedSource, MarketDataSource, OracleSource, PriceService, PriceSource, TokenUniverse,
};
use stablecoin_api::sync::{
    ChallengesService, EcosystemService, HeightSource, MintersService, Orchestrator,
    PositionsService, SyncTask,
};
use stablecoin_api::utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    utils::logger::init_logger();
    info!("Starting stablecoin API sync engine");

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    config.log_summary();

    // Upstream clients
    let chain = Arc::new(ChainReader::new(&config.rpc_url)?);
    let client = Arc::new(
        IndexerClient::with_timeout(
            config.indexer_url.clone(),
            config.indexer_fallback_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_retry_settings(config.retry_delay_ms, config.max_retries)
        .with_failover_cooldown(Duration::from_secs(config.failover_cooldown_secs)),
    );

    // Change-event handoff between the sync path and notification dispatch
    let events = Arc::new(ChangeQueue::with_capacity(config.change_queue_size));

    // Domain synchronizers, one writer per cache
    let positions = Arc::new(PositionsService::new(
        Arc::clone(&client),
        Arc::clone(&chain),
        config.savings_address,
        Arc::clone(&events),
    ));
    let challenges = Arc::new(ChallengesService::new(
        Arc::clone(&client),
        Arc::clone(&chain),
        config.auction_hub_address,
        Arc::clone(&events),
    ));
    let minters = Arc::new(MintersService::new(Arc::clone(&client), Arc::clone(&events)));
    let ecosystem = Arc::new(EcosystemService::new(
        Arc::clone(&client),
        Arc::clone(&chain),
        config.stablecoin.address,
        config.pool_share.address,
    ));

    // Price cache with its resolution order: derived pricing first, then
    // configured on-chain feeds, then the external provider
    let price_cache = Arc::new(SnapshotCache::new());
    let sources: Vec<Arc<dyn PriceSource>> = vec![
        Arc::new(DerivedSource::new(
            config.pool_share.address,
            config.stablecoin.address,
            Arc::clone(&ecosystem),
            Arc::clone(&price_cache),
        )),
        Arc::new(OracleSource::new(
            Arc::clone(&chain),
            config.oracle_feeds.clone(),
            Arc::clone(&price_cache),
        )),
        Arc::new(MarketDataSource::new(
            config.market_data_url.clone(),
            config.market_data_api_key.clone(),
            config.chain_id,
            config.stablecoin.address,
            Duration::from_secs(config.request_timeout_secs),
        )?),
    ];
    let prices = Arc::new(
        PriceService::new(
            price_cache,
            sources,
            Arc::clone(&positions) as Arc<dyn TokenUniverse>,
            config.stablecoin.clone(),
            config.pool_share.clone(),
        )
        .with_ttl(Duration::from_secs(config.price_ttl_secs)),
    );

    // Batch plan: indexer-backed snapshots first, then the reads that
    // depend on them
    let plan = vec![
        vec![
            task("positions", &positions, |s| async move {
                s.update_positions().await
            }),
            task("minting-updates", &positions, |s| async move {
                s.update_minting_updates().await
            }),
            task("challenges", &challenges, |s| async move {
                s.update_challenges().await
            }),
            task("bids", &challenges, |s| async move { s.update_bids().await }),
            task("minters", &minters, |s| async move { s.update_minters().await }),
            task("ecosystem-key-values", &ecosystem, |s| async move {
                s.update_key_values().await
            }),
            task("mint-burn-mapping", &ecosystem, |s| async move {
                s.update_mint_burn_mapping().await
            }),
        ],
        vec![
            task("prices", &prices, |s| async move { s.refresh().await }),
            task("auction-prices", &challenges, |s| async move {
                s.update_auction_prices().await
            }),
            task("pool-share", &ecosystem, |s| async move {
                s.update_pool_share().await
            }),
        ],
    ];

    let orchestrator = Orchestrator::new(Arc::clone(&chain) as Arc<dyn HeightSource>, plan)
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
        .with_batch_pause(Duration::from_millis(config.batch_pause_ms))
        .with_stuck_threshold(config.stuck_poll_threshold);

    // Notification dispatch runs on its own schedule, decoupled from the
    // sync cycle
    let dispatcher = Dispatcher::new(Arc::clone(&events), Arc::new(LogNotifier));
    tokio::spawn(dispatcher.run());

    tokio::select! {
        _ = orchestrator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Wrap a service method as a named task for the batch plan.
fn task<S, F, Fut>(name: &'static str, service: &Arc<S>, f: F) -> Arc<SyncTask>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let service = Arc::clone(service);
    SyncTask::new(name, move || f(Arc::clone(&service)))
}
