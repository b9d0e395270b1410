//! In-flight generation registry.
//!
//! At most one job runs per [`CacheKey`]. The first caller spawns it and
//! publishes a [`Shared`] handle; everyone arriving while it is pending
//! awaits that handle instead of starting a second paid call.

use crate::key::CacheKey;
use crate::metrics::METRICS;
use crate::{Result, ScentKitError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type SharedJob<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Slot<V: Clone> {
    id: u64,
    handle: SharedJob<V>,
}

/// Per-key registry of pending jobs.
///
/// A slot is removed as soon as its job settles, whatever the outcome, so a
/// failed key can be retried by the next caller. A detached driver task
/// keeps the job running (and the slot cleanup happening) even if every
/// caller goes away.
pub struct InFlight<V: Clone> {
    slots: Arc<DashMap<CacheKey, Slot<V>>>,
    next_id: Arc<AtomicU64>,
}

impl<V: Clone> Clone for InFlight<V> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<V: Clone> Default for InFlight<V> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<V> InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `factory` for `key` unless a job for it is already pending, in
    /// which case the pending job's outcome is returned instead.
    pub async fn dedupe<F, Fut>(&self, key: &CacheKey, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (handle, leader_id) = match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => {
                METRICS.inflight_joins.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[inflight] joining pending job for {}", key);
                (slot.get().handle.clone(), None)
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let handle = guard_panics(factory()).boxed().shared();
                vacant.insert(Slot {
                    id,
                    handle: handle.clone(),
                });
                (handle, Some(id))
            }
        };

        // Shard lock is released by now; the driver must never block on it.
        if let Some(id) = leader_id {
            let driver = handle.clone();
            let registry = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _ = driver.await;
                registry.release(&key, id);
            });
        }

        let outcome = handle.await;
        if let Some(id) = leader_id {
            self.release(key, id);
        }
        outcome
    }

    /// Only removes the slot this job created; a newer job for the same key
    /// is left alone.
    fn release(&self, key: &CacheKey, id: u64) {
        self.slots.remove_if(key, |_, slot| slot.id == id);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forgets every pending job. Jobs already running still finish and
    /// their callers still get the result.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

async fn guard_panics<V, Fut>(job: Fut) -> Result<V>
where
    Fut: Future<Output = Result<V>>,
{
    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!("[inflight] generation job panicked");
            Err(ScentKitError::GenerationFailed("generation job panicked".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{build_key, Category, KeyParts, Language};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key(subject: &str) -> CacheKey {
        build_key(&KeyParts::text("v1", subject, Category::Any, Language::En))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_job() {
        let inflight = InFlight::<String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let inflight = inflight.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    inflight
                        .dedupe(&key("goku"), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok("kamehameha".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().unwrap(), "kamehameha");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let inflight = InFlight::<u32>::new();
        let (ka, kb) = (key("a"), key("b"));
        let (a, b) = tokio::join!(
            inflight.dedupe(&ka, || async { Ok(1) }),
            inflight.dedupe(&kb, || async { Ok(2) }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    }

    #[tokio::test]
    async fn failure_releases_slot_and_allows_retry() {
        let inflight = InFlight::<u32>::new();
        let first = inflight
            .dedupe(&key("joel"), || async {
                Err(ScentKitError::GenerationFailed("provider down".into()))
            })
            .await;
        assert!(matches!(first, Err(ScentKitError::GenerationFailed(_))));
        assert!(!inflight.contains(&key("joel")));

        let retry = inflight.dedupe(&key("joel"), || async { Ok(7) }).await;
        assert_eq!(retry.unwrap(), 7);
    }

    #[tokio::test]
    async fn timed_out_job_releases_slot() {
        let inflight = InFlight::<u32>::new();
        let outcome = inflight
            .dedupe(&key("ellie"), || async {
                match tokio::time::timeout(Duration::from_millis(10), std::future::pending::<()>()).await {
                    Ok(()) => Ok(1),
                    Err(_) => Err(ScentKitError::GenerationFailed("timed out".into())),
                }
            })
            .await;
        assert!(outcome.is_err());
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn panicking_job_is_a_generation_failure() {
        let inflight = InFlight::<u32>::new();
        let outcome = inflight
            .dedupe(&key("vegeta"), || async {
                if true {
                    panic!("boom");
                }
                Ok(1)
            })
            .await;
        assert!(matches!(outcome, Err(ScentKitError::GenerationFailed(_))));
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn abandoned_job_still_completes_and_cleans_up() {
        let inflight = InFlight::<u32>::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();

        let caller = {
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .dedupe(&key("piccolo"), || async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        flag.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }
}
