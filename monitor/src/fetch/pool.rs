//! Bounded fan-out with per-item timeouts

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{MonitorError, Result};

/// Races `future` against `after`; elapsed time becomes [`MonitorError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, after: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => Err(MonitorError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

/// Result for one input item. Outcomes come back in input order.
#[derive(Debug)]
pub struct PoolOutcome<I, T> {
    pub item: I,
    pub result: Result<T>,
}

#[derive(Debug, Clone)]
pub struct BoundedPool {
    limit: usize,
    timeout: Duration,
}

impl BoundedPool {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        Self {
            limit: limit.max(1),
            timeout,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `task` over `items` with at most `limit` in flight. A failed or
    /// timed out item does not affect the others.
    pub async fn run<I, T, F, Fut>(&self, operation: &str, items: Vec<I>, task: F) -> Vec<PoolOutcome<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let task = Arc::new(task);
        let mut jobs = Vec::with_capacity(items.len());

        debug!(operation, items = items.len(), limit = self.limit, "starting bounded fan-out");

        for item in items.iter().cloned() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    jobs.push(tokio::spawn(async move {
                        Err::<T, _>(MonitorError::Internal(format!("pool closed: {}", e)))
                    }));
                    continue;
                }
            };
            let task = task.clone();
            let operation = operation.to_string();
            let timeout = self.timeout;
            jobs.push(tokio::spawn(async move {
                let result = with_timeout(&operation, timeout, task(item)).await;
                drop(permit);
                result
            }));
        }

        join_all(jobs)
            .await
            .into_iter()
            .zip(items)
            .map(|(joined, item)| PoolOutcome {
                item,
                result: joined
                    .map_err(|e| MonitorError::Internal(format!("{} task failed: {}", operation, e)))
                    .and_then(|result| result),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed() {
        let ok = with_timeout("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(assert_ok!(ok), 7);

        let slow = with_timeout("slow", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match assert_err!(slow) {
            MonitorError::Timeout { operation, after } => {
                assert_eq!(operation, "slow");
                assert_eq!(after, Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_in_flight() {
        let pool = BoundedPool::new(3, Duration::from_secs(30));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let outcomes = {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            pool.run("count_in_flight", (0..10u64).collect(), move |n| {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(n * 2)
                }
            })
            .await
        };

        assert_eq!(outcomes.len(), 10);
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.item, i as u64);
            assert_eq!(*outcome.result.as_ref().unwrap(), i as u64 * 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_isolates_failures() {
        let pool = BoundedPool::new(2, Duration::from_secs(1));

        let outcomes = pool
            .run("mixed", vec![1u64, 2, 3], |n| async move {
                match n {
                    2 => Err(MonitorError::Rpc("boom".to_string())),
                    3 => {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(n)
                    }
                    _ => Ok(n),
                }
            })
            .await;

        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(MonitorError::Rpc(_))));
        assert!(matches!(outcomes[2].result, Err(MonitorError::Timeout { .. })));
    }
}
