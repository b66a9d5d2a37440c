//! In-flight request coalescing
//!
//! `SingleFlight` guarantees at most one execution per key at a time. The
//! first caller (the leader) spawns the work onto the runtime and publishes a
//! shared completion handle; callers arriving while it runs await the same
//! handle and receive an identical `Result`. The spawned task owns a guard
//! that removes the map entry once the work settles, including on panic, so
//! the work itself can publish its result (for instance into a cache) before
//! the entry disappears.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error};

use crate::error::{GatewayError, Result};

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;
type FlightMap<K, V> = Mutex<HashMap<K, SharedResult<V>>>;

/// How a caller obtained its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Started the work
    Leader,
    /// Awaited work started by another caller
    Joined,
    /// The recheck produced a value and no work was needed
    Cached,
}

/// Removes a key from the in-flight map when dropped
struct FlightGuard<K: Hash + Eq, V> {
    map: Weak<FlightMap<K, V>>,
    key: Option<K>,
}

impl<K: Hash + Eq, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        if let (Some(map), Some(key)) = (self.map.upgrade(), self.key.take()) {
            lock(&map).remove(&key);
        }
    }
}

fn lock<K, V>(map: &FlightMap<K, V>) -> MutexGuard<'_, HashMap<K, SharedResult<V>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-key deduplication of concurrent work
pub struct SingleFlight<K, V> {
    in_flight: Arc<FlightMap<K, V>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless an execution is already in flight
    ///
    /// `recheck` runs under the in-flight lock when no execution exists. A
    /// `Some` value is returned without starting work, which closes the gap
    /// between a leader publishing its result and removing its entry.
    pub async fn run<C, F, Fut>(&self, key: K, recheck: C, work: F) -> (Result<V>, FlightRole)
    where
        C: FnOnce() -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (shared, role) = {
            let mut map = lock(&self.in_flight);

            if let Some(existing) = map.get(&key) {
                (existing.clone(), FlightRole::Joined)
            } else if let Some(value) = recheck() {
                return (Ok(value), FlightRole::Cached);
            } else {
                let guard = FlightGuard {
                    map: Arc::downgrade(&self.in_flight),
                    key: Some(key.clone()),
                };
                let fut = work();
                // The guard only takes the map lock after this block releases it
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    fut.await
                });

                let shared = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(join_error) => {
                            error!(error = %join_error, "In-flight task did not complete");
                            Err(GatewayError::internal(format!("in-flight task failed: {}", join_error)))
                        }
                    }
                }
                .boxed()
                .shared();

                map.insert(key, shared.clone());
                (shared, FlightRole::Leader)
            }
        };

        if role == FlightRole::Joined {
            debug!("Joined in-flight execution");
        }
        (shared.await, role)
    }

    /// Number of keys currently executing
    pub fn len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                flight
                    .run("k", || None, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, GatewayError>(42)
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for task in tasks {
            let (result, role) = task.await.unwrap();
            assert_eq!(result.unwrap(), 42);
            if role == FlightRole::Leader {
                leaders += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert!(flight.is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let flight: Arc<SingleFlight<u8, u8>> = Arc::new(SingleFlight::new());
        let slow_failure = || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<u8, _>(GatewayError::upstream("boom"))
        };

        let first = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run(1, || None, slow_failure).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (second, role) = flight
            .run(1, || None, || async { Ok::<_, GatewayError>(7) })
            .await;

        assert_eq!(role, FlightRole::Joined);
        assert_eq!(second.unwrap_err().to_string(), first.await.unwrap().0.unwrap_err().to_string());
    }

    #[tokio::test]
    async fn test_recheck_short_circuits() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let (result, role) = flight
            .run(1, || Some(3), || async { Err::<u8, _>(GatewayError::internal("work started")) })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(role, FlightRole::Cached);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flight: SingleFlight<u8, usize> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for expected in 1..=2 {
            let calls = Arc::clone(&calls);
            let (result, role) = flight
                .run(1, || None, move || async move {
                    Ok::<_, GatewayError>(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(result.unwrap(), expected);
            assert_eq!(role, FlightRole::Leader);
        }
    }

    fn flight_should_panic() -> bool {
        true
    }

    #[tokio::test]
    async fn test_panicking_work_becomes_internal_error() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let (result, _) = flight
            .run(1, || None, || async {
                if flight_should_panic() {
                    panic!("worker exploded");
                }
                Ok::<u8, GatewayError>(0)
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Internal(_))));
        assert!(flight.is_empty());
    }
}
