mod contracts;

pub use contracts::{
    AuctionHub, Equity, MintingPosition, PriceFeedAggregator, SavingsModule, Stablecoin, ERC20,
};

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, U256};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("provider error: {0}")]
    Provider(String),

    /// Reverted or undecodable call. The value is omitted from the batch;
    /// callers keep the prior cached value for that key.
    #[error("contract call failed: {0}")]
    Call(String),
}

/// Point reads against the blockchain node.
///
/// Batch variants execute all calls concurrently and settle every one:
/// the returned vector has one result per request in input order, and a
/// single failing call never aborts its siblings.
pub struct ChainReader {
    provider: Arc<Provider<Http>>,
}

impl ChainReader {
    pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Provider(format!("failed to create HTTP provider: {}", e)))?;
        info!("Creating chain reader for {}", rpc_url);
        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        Arc::clone(&self.provider)
    }

    /// Current chain height, the sync cycle's progress watermark.
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ChainError::Provider(e.to_string()))
    }

    /// `balanceOf(holder)` on each `(token, holder)` pair.
    pub async fn balance_of_many(
        &self,
        calls: &[(Address, Address)],
    ) -> Vec<Result<U256, ChainError>> {
        settle_all(calls.iter().map(|(token, holder)| {
            let token = *token;
            let holder = *holder;
            let contract = ERC20::new(token, self.provider());
            async move {
                contract.balance_of(holder).call().await.map_err(|e| {
                    ChainError::Call(format!("balanceOf({:?}) on {:?}: {}", holder, token, e))
                })
            }
        }))
        .await
    }

    /// `minted()` on each position contract.
    pub async fn minted_many(&self, positions: &[Address]) -> Vec<Result<U256, ChainError>> {
        settle_all(positions.iter().map(|position| {
            let position = *position;
            let contract = MintingPosition::new(position, self.provider());
            async move {
                contract
                    .minted()
                    .call()
                    .await
                    .map_err(|e| ChainError::Call(format!("minted() on {:?}: {}", position, e)))
            }
        }))
        .await
    }

    /// Current auction price for each challenge number on the hub.
    pub async fn auction_price_many(
        &self,
        hub: Address,
        numbers: &[u64],
    ) -> Vec<Result<U256, ChainError>> {
        settle_all(numbers.iter().map(|number| {
            let number = *number;
            let contract = AuctionHub::new(hub, self.provider());
            async move {
                contract.price(U256::from(number)).call().await.map_err(|e| {
                    ChainError::Call(format!("price({}) on {:?}: {}", number, hub, e))
                })
            }
        }))
        .await
    }

    pub async fn lead_rate_ppm(&self, savings: Address) -> Result<u32, ChainError> {
        SavingsModule::new(savings, self.provider())
            .current_rate_ppm()
            .call()
            .await
            .map_err(|e| ChainError::Call(format!("currentRatePPM() on {:?}: {}", savings, e)))
    }

    pub async fn equity_price(&self, equity: Address) -> Result<U256, ChainError> {
        Equity::new(equity, self.provider())
            .price()
            .call()
            .await
            .map_err(|e| ChainError::Call(format!("price() on {:?}: {}", equity, e)))
    }

    pub async fn equity_total_supply(&self, equity: Address) -> Result<U256, ChainError> {
        Equity::new(equity, self.provider())
            .total_supply()
            .call()
            .await
            .map_err(|e| ChainError::Call(format!("totalSupply() on {:?}: {}", equity, e)))
    }

    pub async fn minter_reserve(&self, stablecoin: Address) -> Result<U256, ChainError> {
        Stablecoin::new(stablecoin, self.provider())
            .minter_reserve()
            .call()
            .await
            .map_err(|e| ChainError::Call(format!("minterReserve() on {:?}: {}", stablecoin, e)))
    }

    pub async fn stablecoin_balance(
        &self,
        stablecoin: Address,
        holder: Address,
    ) -> Result<U256, ChainError> {
        Stablecoin::new(stablecoin, self.provider())
            .balance_of(holder)
            .call()
            .await
            .map_err(|e| {
                ChainError::Call(format!("balanceOf({:?}) on {:?}: {}", holder, stablecoin, e))
            })
    }

    /// Latest answer of a Chainlink-style aggregator, scaled by the feed's
    /// decimals.
    pub async fn oracle_latest_price(&self, feed: Address) -> Result<f64, ChainError> {
        let contract = PriceFeedAggregator::new(feed, self.provider());
        let decimals = contract
            .decimals()
            .call()
            .await
            .map_err(|e| ChainError::Call(format!("decimals() on {:?}: {}", feed, e)))?;
        let (_, answer, _, _, _) = contract
            .latest_round_data()
            .call()
            .await
            .map_err(|e| ChainError::Call(format!("latestRoundData() on {:?}: {}", feed, e)))?;

        let answer: i128 = answer
            .try_into()
            .map_err(|_| ChainError::Call(format!("oracle answer out of range on {:?}", feed)))?;
        if answer <= 0 {
            return Err(ChainError::Call(format!(
                "non-positive oracle answer on {:?}",
                feed
            )));
        }
        Ok(answer as f64 / 10f64.powi(decimals as i32))
    }
}

/// Run a set of calls concurrently and settle every one: one result per
/// call, input order preserved, no call's failure aborting the others.
pub async fn settle_all<T, Fut>(calls: impl IntoIterator<Item = Fut>) -> Vec<Result<T, ChainError>>
where
    Fut: Future<Output = Result<T, ChainError>>,
{
    futures::future::join_all(calls).await
}

/// Render a raw token amount as an f64, the precision the API serves.
pub fn to_f64(value: U256, decimals: u32) -> f64 {
    ethers::utils::format_units(value, decimals)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_to_f64_scales_by_decimals() {
        let raw = U256::from_dec_str("1500000000000000000").unwrap();
        assert!((to_f64(raw, 18) - 1.5).abs() < 1e-12);
        assert_eq!(to_f64(U256::zero(), 18), 0.0);
    }

    #[tokio::test]
    async fn test_settle_all_tolerates_partial_failure() {
        let calls = vec![
            async { Ok(U256::from(1)) }.boxed(),
            async { Err(ChainError::Call("execution reverted".to_string())) }.boxed(),
            async { Ok(U256::from(3)) }.boxed(),
        ];

        let results = settle_all(calls).await;

        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), U256::from(1));
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), U256::from(3));
    }
}
