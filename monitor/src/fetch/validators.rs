//! Validator set fetching

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::fetch::cache::TtlCache;
use crate::fetch::pool::{with_timeout, BoundedPool};
use crate::fetch::ChainSource;
use crate::models::ChainValidator;

const VALIDATOR_SET_KEY: &str = "validator_set";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorFetch {
    pub validators: Vec<ChainValidator>,
    /// Per-baker failures; the rest of the set is still returned.
    pub errors: Vec<String>,
    pub cached: bool,
}

/// Enumerates bakers and fetches pool info for each through a
/// [`BoundedPool`]. Complete result sets are cached for the TTL.
pub struct ValidatorFetcher {
    chain: Arc<dyn ChainSource>,
    pool: BoundedPool,
    cache: TtlCache<&'static str, Vec<ChainValidator>>,
}

impl ValidatorFetcher {
    pub fn new(chain: Arc<dyn ChainSource>, pool: BoundedPool, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            chain,
            pool,
            cache: TtlCache::new(ttl, clock),
        }
    }

    pub async fn fetch_validators(&self) -> Result<ValidatorFetch> {
        if let Some(validators) = self.cache.get(&VALIDATOR_SET_KEY) {
            debug!(count = validators.len(), "validator set served from cache");
            return Ok(ValidatorFetch {
                validators,
                errors: Vec::new(),
                cached: true,
            });
        }

        let baker_ids = with_timeout("get_baker_ids", self.pool.timeout(), self.chain.get_baker_ids()).await?;

        let chain = self.chain.clone();
        let outcomes = self
            .pool
            .run("get_pool_info", baker_ids, move |baker_id| {
                let chain = chain.clone();
                async move { chain.get_pool_info(baker_id).await }
            })
            .await;

        let mut fetch = ValidatorFetch::default();
        for outcome in outcomes {
            match outcome.result {
                Ok(validator) => fetch.validators.push(validator),
                Err(e) => {
                    warn!(baker_id = outcome.item, error = %e, "pool info fetch failed");
                    fetch.errors.push(format!("baker {}: {}", outcome.item, e));
                }
            }
        }

        if fetch.errors.is_empty() {
            self.cache.insert(VALIDATOR_SET_KEY, fetch.validators.clone());
        }

        Ok(fetch)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&VALIDATOR_SET_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::MonitorError;
    use crate::models::{Amount, BlockInfo, PeerInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeChain {
        bakers: Vec<u64>,
        failing: Option<u64>,
        pool_calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainSource for FakeChain {
        async fn get_node_id(&self) -> Result<String> {
            Ok("local".to_string())
        }

        async fn get_peers(&self) -> Result<Vec<PeerInfo>> {
            Ok(Vec::new())
        }

        async fn get_baker_ids(&self) -> Result<Vec<u64>> {
            Ok(self.bakers.clone())
        }

        async fn get_pool_info(&self, baker_id: u64) -> Result<ChainValidator> {
            self.pool_calls.fetch_add(1, Ordering::SeqCst);
            if Some(baker_id) == self.failing {
                return Err(MonitorError::Rpc(format!("no pool for {baker_id}")));
            }
            Ok(ChainValidator {
                baker_id,
                total_stake: Amount(1_000),
                lottery_power: 0.25,
                ..Default::default()
            })
        }

        async fn get_finalized_height(&self) -> Result<u64> {
            Ok(0)
        }

        async fn get_block_at_height(&self, height: u64) -> Result<BlockInfo> {
            Err(MonitorError::NotFound(format!("block {height}")))
        }
    }

    fn fetcher(chain: Arc<FakeChain>, clock: Arc<ManualClock>) -> ValidatorFetcher {
        ValidatorFetcher::new(
            chain,
            BoundedPool::new(2, std::time::Duration::from_secs(5)),
            Duration::minutes(10),
            clock,
        )
    }

    #[tokio::test]
    async fn test_complete_set_is_cached() {
        let chain = Arc::new(FakeChain {
            bakers: vec![1, 2, 3, 4],
            failing: None,
            pool_calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::at_millis(0));
        let fetcher = fetcher(chain.clone(), clock.clone());

        let first = fetcher.fetch_validators().await.unwrap();
        assert_eq!(first.validators.len(), 4);
        assert!(!first.cached);

        let second = fetcher.fetch_validators().await.unwrap();
        assert!(second.cached);
        assert_eq!(chain.pool_calls.load(Ordering::SeqCst), 4);

        clock.advance(Duration::minutes(10));
        let third = fetcher.fetch_validators().await.unwrap();
        assert!(!third.cached);
        assert_eq!(chain.pool_calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_cached() {
        let chain = Arc::new(FakeChain {
            bakers: vec![1, 2, 3],
            failing: Some(2),
            pool_calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::at_millis(0));
        let fetcher = fetcher(chain.clone(), clock);

        let fetch = fetcher.fetch_validators().await.unwrap();
        assert_eq!(fetch.validators.len(), 2);
        assert_eq!(fetch.errors.len(), 1);
        assert!(fetch.errors[0].starts_with("baker 2"));

        assert!(!fetcher.fetch_validators().await.unwrap().cached);
    }
}
