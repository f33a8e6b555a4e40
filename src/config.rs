use anyhow::{Context, Result};
use ethers::types::Address;
use std::collections::HashMap;
use std::env;
use tracing::info;

use crate::models::TokenInfo;
use crate::prices::OracleFeed;

#[derive(Debug, Clone)]
pub struct Config {
    pub indexer_url: String,
    pub indexer_fallback_url: Option<String>,
    pub rpc_url: String,
    pub chain_id: u64,
    pub market_data_url: String,
    pub market_data_api_key: Option<String>,

    pub stablecoin: TokenInfo,
    pub pool_share: TokenInfo,
    pub savings_address: Address,
    pub auction_hub_address: Address,
    /// token -> aggregator feed, parsed from `ORACLE_FEEDS`
    pub oracle_feeds: HashMap<Address, OracleFeed>,

    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub failover_cooldown_secs: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub price_ttl_secs: u64,
    pub batch_pause_ms: u64,
    pub stuck_poll_threshold: u32,
    pub change_queue_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        let _ = dotenv::dotenv();

        let indexer_url = env::var("INDEXER_URL").context("INDEXER_URL must be set")?;

        let indexer_fallback_url = env::var("INDEXER_FALLBACK_URL").ok().filter(|s| !s.is_empty());

        let rpc_url = env::var("RPC_URL").context("RPC_URL must be set")?;

        let chain_id = env::var("CHAIN_ID")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("CHAIN_ID must be a valid number")?;

        let market_data_url = env::var("MARKET_DATA_URL")
            .unwrap_or_else(|_| "https://pro-api.coingecko.com".to_string());

        let market_data_api_key = env::var("MARKET_DATA_API_KEY").ok().filter(|s| !s.is_empty());

        let stablecoin_address: Address = env::var("STABLECOIN_ADDRESS")
            .context("STABLECOIN_ADDRESS must be set")?
            .parse()
            .context("STABLECOIN_ADDRESS must be a valid address")?;

        let equity_address: Address = env::var("EQUITY_ADDRESS")
            .context("EQUITY_ADDRESS must be set")?
            .parse()
            .context("EQUITY_ADDRESS must be a valid address")?;

        let savings_address: Address = env::var("SAVINGS_ADDRESS")
            .context("SAVINGS_ADDRESS must be set")?
            .parse()
            .context("SAVINGS_ADDRESS must be a valid address")?;

        let auction_hub_address: Address = env::var("AUCTION_HUB_ADDRESS")
            .context("AUCTION_HUB_ADDRESS must be set")?
            .parse()
            .context("AUCTION_HUB_ADDRESS must be a valid address")?;

        let oracle_feeds = parse_oracle_feeds(&env::var("ORACLE_FEEDS").unwrap_or_default())
            .context("ORACLE_FEEDS must be 'token=aggregator[@reference]' pairs")?;

        // Derived from the expected block time: 12s blocks on mainnet,
        // faster chains are polled with a skip.
        let default_poll = if chain_id == 1 { "6000" } else { "10000" };
        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| default_poll.to_string())
            .parse()
            .context("POLL_INTERVAL_MS must be a valid number")?;

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("REQUEST_TIMEOUT_SECS must be a valid number")?;

        let failover_cooldown_secs = env::var("FAILOVER_COOLDOWN_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .context("FAILOVER_COOLDOWN_SECS must be a valid number")?;

        let retry_delay_ms = env::var("RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("RETRY_DELAY_MS must be a valid number")?;

        let max_retries = env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("MAX_RETRIES must be a valid number")?;

        let price_ttl_secs = env::var("PRICE_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("PRICE_TTL_SECS must be a valid number")?;

        let batch_pause_ms = env::var("BATCH_PAUSE_MS")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .context("BATCH_PAUSE_MS must be a valid number")?;

        let stuck_poll_threshold = env::var("STUCK_POLL_THRESHOLD")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("STUCK_POLL_THRESHOLD must be a valid number")?;

        let change_queue_size = env::var("CHANGE_QUEUE_SIZE")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .context("CHANGE_QUEUE_SIZE must be a valid number")?;

        let stablecoin = TokenInfo {
            address: stablecoin_address,
            name: env::var("STABLECOIN_NAME").unwrap_or_else(|_| "Decentralized Euro".to_string()),
            symbol: env::var("STABLECOIN_SYMBOL").unwrap_or_else(|_| "dEURO".to_string()),
            decimals: 18,
        };

        let pool_share = TokenInfo {
            address: equity_address,
            name: env::var("POOL_SHARE_NAME")
                .unwrap_or_else(|_| "Decentralized Euro Pool Share".to_string()),
            symbol: env::var("POOL_SHARE_SYMBOL").unwrap_or_else(|_| "DEPS".to_string()),
            decimals: 18,
        };

        Ok(Config {
            indexer_url,
            indexer_fallback_url,
            rpc_url,
            chain_id,
            market_data_url,
            market_data_api_key,
            stablecoin,
            pool_share,
            savings_address,
            auction_hub_address,
            oracle_feeds,
            poll_interval_ms,
            request_timeout_secs,
            failover_cooldown_secs,
            retry_delay_ms,
            max_retries,
            price_ttl_secs,
            batch_pause_ms,
            stuck_poll_threshold,
            change_queue_size,
        })
    }

    pub fn log_summary(&self) {
        info!(
            "Config settings: chain_id={}, poll_interval={}ms, price_ttl={}s, request_timeout={}s, failover_cooldown={}s",
            self.chain_id,
            self.poll_interval_ms,
            self.price_ttl_secs,
            self.request_timeout_secs,
            self.failover_cooldown_secs
        );
        info!(
            "Upstreams: indexer={} (fallback: {}), rpc={}",
            self.indexer_url,
            self.indexer_fallback_url.as_deref().unwrap_or("none"),
            self.rpc_url
        );
        if !self.oracle_feeds.is_empty() {
            info!("Oracle feeds configured for {} tokens", self.oracle_feeds.len());
        }
    }
}

/// Parse `token=aggregator[@reference]` pairs separated by commas.
fn parse_oracle_feeds(raw: &str) -> Result<HashMap<Address, OracleFeed>> {
    let mut feeds = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (token, feed) = pair
            .split_once('=')
            .with_context(|| format!("missing '=' in oracle feed '{}'", pair))?;

        let (aggregator, reference) = match feed.split_once('@') {
            Some((aggregator, reference)) => (aggregator, Some(reference)),
            None => (feed, None),
        };

        let token: Address = token
            .trim()
            .parse()
            .with_context(|| format!("invalid token address in '{}'", pair))?;
        let aggregator: Address = aggregator
            .trim()
            .parse()
            .with_context(|| format!("invalid aggregator address in '{}'", pair))?;
        let reference: Option<Address> = match reference {
            Some(reference) => Some(
                reference
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid reference address in '{}'", pair))?,
            ),
            None => None,
        };

        feeds.insert(token, OracleFeed { aggregator, reference });
    }
    Ok(feeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oracle_feeds() {
        let token = "0x1111111111111111111111111111111111111111";
        let aggregator = "0x2222222222222222222222222222222222222222";
        let reference = "0x3333333333333333333333333333333333333333";

        let feeds = parse_oracle_feeds(&format!(
            "{}={}@{}, {}={}",
            token, aggregator, reference, reference, aggregator
        ))
        .unwrap();

        assert_eq!(feeds.len(), 2);
        let feed = feeds[&token.parse::<Address>().unwrap()];
        assert_eq!(feed.aggregator, aggregator.parse::<Address>().unwrap());
        assert_eq!(feed.reference, Some(reference.parse::<Address>().unwrap()));

        let direct = feeds[&reference.parse::<Address>().unwrap()];
        assert_eq!(direct.reference, None);

        assert!(parse_oracle_feeds("").unwrap().is_empty());
        assert!(parse_oracle_feeds("garbage").is_err());
    }
}
