//! Query cache store.
//!
//! [`QueryCache`] is the shared, explicitly constructed store behind every
//! read and write. It owns:
//!
//! - the entry map (moka, bounded by [`CacheConfig::max_entries`] and
//!   collected after [`CacheConfig::gc_time`] without reads),
//! - the in-flight table that guarantees at most one outstanding fetch per
//!   key,
//! - one `watch` channel per subscribed key.
//!
//! # Mutation discipline
//!
//! Entries change only when a fetch settles, when an invalidation marks
//! them stale, or when a snapshot is hydrated. There is no direct
//! "set data" path; writes go through the backend and then invalidate.
//!
//! # Lock order
//!
//! `in_flight` before `observers`. Nothing awaits while holding either.
//!
//! # Runtime
//!
//! Fetches run on spawned tokio tasks so that they complete even when every
//! subscriber has gone away. Methods that may fetch must be called from
//! within a tokio runtime.

pub mod entry;
pub mod hydration;
pub mod subscription;

pub use entry::{CacheEntry, EntryOutcome, now_millis};
pub use hydration::{DehydratedQuery, DehydratedState};
pub use subscription::{QueryState, QueryStatus, Subscription};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::keys::QueryKey;
use crate::query::{DEFAULT_FRESHNESS, ErasedFetcher, QueryDescriptor};
use crate::retry::{RetryConfig, with_retry};
use crate::telemetry;
use crate::{RestashError, Result};

use subscription::RawState;

/// Configuration for a [`QueryCache`].
///
/// ```rust
/// # use restash::{CacheConfig, RetryConfig};
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(5_000)
///     .gc_time(Duration::from_secs(600))
///     .retry(RetryConfig::disabled());
/// assert_eq!(config.retry.max_attempts, 1);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 1,000.
    pub max_entries: u64,
    /// Entries not read for this long are dropped. Default: 5 minutes.
    pub gc_time: Duration,
    /// Freshness used by resource descriptors. Default: 60s.
    pub default_freshness: Duration,
    /// Retry policy for fetches. Default: disabled (one attempt).
    pub retry: RetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            gc_time: Duration::from_secs(300),
            default_freshness: DEFAULT_FRESHNESS,
            retry: RetryConfig::disabled(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set how long an unread entry survives.
    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    /// Set the freshness used by resource descriptors.
    pub fn default_freshness(mut self, freshness: Duration) -> Self {
        self.default_freshness = freshness;
        self
    }

    /// Set the fetch retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>>>>;

struct InFlight {
    id: u64,
    invalidated: Arc<AtomicBool>,
    result: SharedFetch,
}

struct Observer {
    tx: watch::Sender<RawState>,
    fetcher: Option<ErasedFetcher>,
    freshness: Duration,
}

impl Observer {
    fn is_active(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

struct Inner {
    entries: moka::sync::Cache<QueryKey, CacheEntry>,
    in_flight: Mutex<HashMap<QueryKey, InFlight>>,
    observers: Mutex<HashMap<QueryKey, Observer>>,
    next_fetch_id: AtomicU64,
    config: CacheConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T> {
    T::deserialize(value).map_err(RestashError::from)
}

/// Shared query cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = moka::sync::Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_idle(config.gc_time)
            .build();
        Self {
            inner: Arc::new(Inner {
                entries,
                in_flight: Mutex::new(HashMap::new()),
                observers: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Return the cached value when fresh, otherwise fetch (sharing any
    /// in-flight fetch for the same key) and return the settled result.
    ///
    /// Disabled descriptors fail with [`RestashError::InvalidInput`].
    #[instrument(skip_all, fields(key = %descriptor.key()))]
    pub async fn fetch_query<T>(&self, descriptor: &QueryDescriptor<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if !descriptor.is_enabled() {
            return Err(RestashError::InvalidInput(format!(
                "query {} is disabled",
                descriptor.key()
            )));
        }
        if let Some(value) = self.fresh_data(descriptor.key()) {
            return decode(&value);
        }
        let value = self
            .inner
            .start_fetch(
                descriptor.key(),
                descriptor.erased(),
                descriptor.freshness_window(),
            )
            .await?;
        decode(&value)
    }

    /// Subscribe to a query.
    ///
    /// When the descriptor is enabled and the key has no fresh entry, a fetch
    /// starts (or an in-flight one is joined). A disabled descriptor only
    /// observes; it never fetches.
    pub fn watch<T>(&self, descriptor: &QueryDescriptor<T>) -> Subscription<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let key = descriptor.key().clone();
        let enabled = descriptor.is_enabled();

        let (rx, entry) = {
            let in_flight = lock(&self.inner.in_flight);
            let mut observers = lock(&self.inner.observers);
            let entry = self.inner.entries.get(&key);
            let fetching = in_flight.contains_key(&key);

            observers.retain(|k, o| o.is_active() || *k == key);
            let observer = observers.entry(key.clone()).or_insert_with(|| Observer {
                tx: watch::Sender::new(RawState::default()),
                fetcher: None,
                freshness: descriptor.freshness_window(),
            });
            if !observer.is_active() {
                // Nobody was listening, so the channel may lag the store.
                observer
                    .tx
                    .send_replace(RawState::from_entry(entry.as_ref(), fetching));
            }
            if enabled {
                observer.fetcher = Some(descriptor.erased());
                observer.freshness = descriptor.freshness_window();
            }
            (observer.tx.subscribe(), entry)
        };

        if enabled {
            match entry {
                Some(entry) if !entry.is_stale() => self.record_hit(&key),
                _ => {
                    self.record_miss(&key);
                    // Runs on its own task; the handle is not needed here.
                    drop(self.inner.start_fetch(
                        &key,
                        descriptor.erased(),
                        descriptor.freshness_window(),
                    ));
                }
            }
        }

        Subscription::new(key, rx)
    }

    fn fresh_data(&self, key: &QueryKey) -> Option<Arc<Value>> {
        match self.inner.entries.get(key) {
            Some(entry) if !entry.is_stale() => {
                self.record_hit(key);
                match entry.outcome {
                    EntryOutcome::Data(value) => Some(value),
                    EntryOutcome::Error(_) => None,
                }
            }
            _ => {
                self.record_miss(key);
                None
            }
        }
    }

    fn record_hit(&self, key: &QueryKey) {
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "resource" => key.resource().to_owned())
            .increment(1);
    }

    fn record_miss(&self, key: &QueryKey) {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "resource" => key.resource().to_owned())
            .increment(1);
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Mark every entry whose key starts with `prefix` stale.
    ///
    /// Observed keys refetch immediately. Unobserved keys stay stale and are
    /// refetched on their next read; their idle channels are dropped. A fetch
    /// already in flight for a matching key is flagged so that its result is
    /// stored stale and, if observed, fetched again.
    ///
    /// Returns the number of entries marked stale.
    #[instrument(skip_all, fields(prefix = %prefix))]
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.invalidate_many(std::slice::from_ref(prefix))
    }

    /// [`invalidate`](Self::invalidate) for several prefixes in one pass.
    ///
    /// A key matching more than one prefix is marked and refetched once.
    #[instrument(skip_all, fields(prefixes = prefixes.len()))]
    pub fn invalidate_many(&self, prefixes: &[QueryKey]) -> usize {
        let covered = |key: &QueryKey| prefixes.iter().any(|p| key.starts_with(p));
        let mut refetch = Vec::new();
        let mut marked: BTreeMap<String, u64> = BTreeMap::new();
        {
            let in_flight = lock(&self.inner.in_flight);
            for (key, fetch) in in_flight.iter() {
                if covered(key) {
                    fetch.invalidated.store(true, Ordering::SeqCst);
                }
            }

            let matching: Vec<_> = self
                .inner
                .entries
                .iter()
                .filter(|(key, _)| covered(&**key))
                .collect();
            for (key, mut entry) in matching {
                entry.invalidated = true;
                *marked.entry(key.resource().to_owned()).or_default() += 1;
                self.inner.entries.insert(QueryKey::clone(&key), entry);
            }

            let mut observers = lock(&self.inner.observers);
            observers.retain(|key, observer| observer.is_active() || !covered(key));
            for (key, observer) in observers.iter() {
                // A flagged in-flight fetch refetches itself when it settles.
                if covered(key)
                    && !in_flight.contains_key(key)
                    && let Some(fetcher) = &observer.fetcher
                {
                    refetch.push((key.clone(), Arc::clone(fetcher), observer.freshness));
                }
            }
        }

        let total: u64 = marked.values().sum();
        for (resource, count) in marked {
            metrics::counter!(telemetry::INVALIDATIONS_TOTAL, "resource" => resource)
                .increment(count);
        }
        debug!(marked = total, refetching = refetch.len(), "invalidated queries");

        for (key, fetcher, freshness) in refetch {
            drop(self.inner.start_fetch(&key, fetcher, freshness));
        }
        total as usize
    }

    /// Drop every entry whose key starts with `prefix`.
    ///
    /// In-flight fetches for those keys keep running, but their results are
    /// discarded unless the key is still observed. Observers without live
    /// subscriptions are dropped.
    pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
        let mut in_flight = lock(&self.inner.in_flight);
        in_flight.retain(|key, _| !key.starts_with(prefix));
        lock(&self.inner.observers).retain(|_, observer| observer.is_active());
        let matching: Vec<_> = self
            .inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in &matching {
            self.inner.entries.invalidate(&**key);
        }
        matching.len()
    }

    /// Drop all entries and observers. Open subscriptions see
    /// [`Subscription::changed`] return `None`.
    pub fn clear(&self) {
        let mut in_flight = lock(&self.inner.in_flight);
        let mut observers = lock(&self.inner.observers);
        in_flight.clear();
        observers.clear();
        self.inner.entries.invalidate_all();
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Copy of the entry stored under `key`.
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.entries.get(key)
    }

    /// Copies of all entries, ordered by key.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<_> = self.inner.entries.iter().map(|(_, e)| e).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Whether at least one live subscription watches `key`.
    pub fn is_observed(&self, key: &QueryKey) -> bool {
        lock(&self.inner.observers)
            .get(key)
            .is_some_and(Observer::is_active)
    }

    /// Whether a fetch for `key` is in flight.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        lock(&self.inner.in_flight).contains_key(key)
    }
}

impl Inner {
    /// Start a fetch for `key`, or join the one already in flight.
    ///
    /// If a fresh entry appeared since the caller looked, it is returned
    /// without fetching.
    fn start_fetch(
        self: &Arc<Self>,
        key: &QueryKey,
        fetcher: ErasedFetcher,
        freshness: Duration,
    ) -> SharedFetch {
        let mut in_flight = lock(&self.in_flight);
        if let Some(existing) = in_flight.get(key) {
            metrics::counter!(
                telemetry::FETCHES_DEDUPLICATED_TOTAL,
                "resource" => key.resource().to_owned()
            )
            .increment(1);
            debug!(%key, "joining in-flight fetch");
            return existing.result.clone();
        }
        if let Some(entry) = self.entries.get(key)
            && !entry.is_stale()
            && let EntryOutcome::Data(value) = entry.outcome
        {
            return futures_util::future::ready(Ok(value)).boxed().shared();
        }

        let id = self.next_fetch_id.fetch_add(1, Ordering::SeqCst);
        let invalidated = Arc::new(AtomicBool::new(false));
        debug!(%key, id, "starting fetch");

        let task = {
            let inner = Arc::clone(self);
            let key = key.clone();
            let invalidated = Arc::clone(&invalidated);
            tokio::spawn(async move {
                let outcome = with_retry(&inner.config.retry, key.resource(), || fetcher()).await;
                inner.settle(&key, id, &invalidated, freshness, outcome)
            })
        };
        let result = async move {
            task.await
                .unwrap_or_else(|e| Err(RestashError::Network(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                invalidated,
                result: result.clone(),
            },
        );
        if let Some(observer) = lock(&self.observers).get(key) {
            observer.tx.send_modify(|state| state.is_fetching = true);
        }
        result
    }

    /// Store a settled fetch and notify subscribers.
    fn settle(
        self: &Arc<Self>,
        key: &QueryKey,
        id: u64,
        invalidated: &AtomicBool,
        freshness: Duration,
        outcome: Result<Value>,
    ) -> Result<Arc<Value>> {
        let outcome = outcome.map(Arc::new);
        let status = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            telemetry::FETCHES_TOTAL,
            "resource" => key.resource().to_owned(),
            "status" => status
        )
        .increment(1);

        let now = now_millis();
        let mut refetch = None;
        {
            let mut in_flight = lock(&self.in_flight);
            let current = in_flight.get(key).is_some_and(|f| f.id == id);
            if current {
                in_flight.remove(key);
            }
            let stale = invalidated.load(Ordering::SeqCst);

            let mut observers = lock(&self.observers);
            if observers.get(key).is_some_and(|o| !o.is_active()) {
                observers.remove(key);
            }
            let observer = observers.get(key);

            if current || observer.is_some() {
                let stored = match &outcome {
                    Ok(value) => EntryOutcome::Data(Arc::clone(value)),
                    Err(err) => EntryOutcome::Error(err.clone()),
                };
                let mut entry = CacheEntry::new(key.clone(), stored, now, freshness);
                entry.invalidated = stale;
                self.entries.insert(key.clone(), entry);
            } else {
                debug!(%key, id, "discarding result for removed query");
            }

            if let Some(observer) = observer {
                observer.tx.send_modify(|state| {
                    match &outcome {
                        Ok(value) => {
                            state.data = Some(Arc::clone(value));
                            state.error = None;
                        }
                        Err(err) => state.error = Some(err.clone()),
                    }
                    state.updated_at = Some(now);
                    state.is_fetching = false;
                });
                if stale && current {
                    refetch = observer
                        .fetcher
                        .as_ref()
                        .map(|f| (Arc::clone(f), observer.freshness));
                }
            }
        }

        match &outcome {
            Ok(_) => debug!(%key, id, "fetch settled"),
            Err(e) => debug!(%key, id, kind = e.kind(), error = %e, "fetch failed"),
        }
        if let Some((fetcher, freshness)) = refetch {
            debug!(%key, "refetching after invalidation during fetch");
            drop(self.start_fetch(key, fetcher, freshness));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ResourceKeys;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn counting(key: QueryKey, calls: &Arc<AtomicU32>) -> QueryDescriptor<u32> {
        let calls = Arc::clone(calls);
        QueryDescriptor::new(key, move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        })
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_fetching() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicU32::new(0));
        let desc = counting(ResourceKeys::new("agent").detail("a1"), &calls);

        assert_eq!(cache.fetch_query(&desc).await.unwrap(), 0);
        assert_eq!(cache.fetch_query(&desc).await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_freshness_always_refetches() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicU32::new(0));
        let desc =
            counting(ResourceKeys::new("agent").detail("a1"), &calls).freshness(Duration::ZERO);

        cache.fetch_query(&desc).await.unwrap();
        cache.fetch_query(&desc).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_descriptor_is_rejected_by_fetch_query() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicU32::new(0));
        let desc = counting(ResourceKeys::new("agent").detail(""), &calls).enabled(false);
        let err = cache.fetch_query(&desc).await.unwrap_err();
        assert!(matches!(err, RestashError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn errors_are_stored_and_not_retried() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let key = ResourceKeys::new("agent").all();
        let desc: QueryDescriptor<u32> = QueryDescriptor::new(key.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(RestashError::Network("connection refused".into())) }
        });

        let err = cache.fetch_query(&desc).await.unwrap_err();
        assert!(matches!(err, RestashError::Network(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = cache.entry(&key).unwrap();
        assert!(matches!(entry.error(), Some(RestashError::Network(_))));
    }

    #[tokio::test]
    async fn invalidate_only_touches_matching_prefix() {
        let cache = QueryCache::default();
        let agents = ResourceKeys::new("agent");
        let templates = ResourceKeys::new("template");
        let calls = Arc::new(AtomicU32::new(0));

        cache
            .fetch_query(&counting(agents.detail("a1"), &calls))
            .await
            .unwrap();
        cache
            .fetch_query(&counting(templates.detail("t1"), &calls))
            .await
            .unwrap();

        assert_eq!(cache.invalidate(&agents.all()), 1);
        assert!(cache.entry(&agents.detail("a1")).unwrap().is_invalidated());
        assert!(!cache.entry(&templates.detail("t1")).unwrap().is_invalidated());
    }

    #[tokio::test]
    async fn removed_query_discards_late_result() {
        let cache = QueryCache::default();
        let key = ResourceKeys::new("agent").detail("a1");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let desc = QueryDescriptor::new(key.clone(), move || {
            let rx = lock(&release_rx).take();
            async move {
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok(json!({"id": "a1"}))
            }
        });

        let pending = {
            let cache = cache.clone();
            let desc = desc.clone();
            tokio::spawn(async move { cache.fetch_query(&desc).await })
        };
        while !cache.is_fetching(&key) {
            tokio::task::yield_now().await;
        }
        cache.remove_queries(&key);
        release_tx.send(()).unwrap();

        let value = pending.await.unwrap().unwrap();
        assert_eq!(value["id"], "a1");
        assert!(cache.entry(&key).is_none());
    }

    #[tokio::test]
    async fn dropped_subscriptions_release_observers_on_remove() {
        let cache = QueryCache::default();
        let keys = ResourceKeys::new("agent");
        let calls = Arc::new(AtomicU32::new(0));

        for page in 0..200 {
            let desc = counting(keys.list(Some(&json!({"page": page}))), &calls);
            let mut sub = cache.watch(&desc);
            sub.settled().await;
        }
        // Every watch after the first pruned its predecessor.
        assert_eq!(lock(&cache.inner.observers).len(), 1);

        assert_eq!(cache.remove_queries(&keys.all()), 200);
        assert!(lock(&cache.inner.observers).is_empty());
    }

    #[tokio::test]
    async fn live_subscriptions_survive_pruning() {
        let cache = QueryCache::default();
        let keys = ResourceKeys::new("agent");
        let calls = Arc::new(AtomicU32::new(0));

        let mut kept = cache.watch(&counting(keys.detail("a1"), &calls));
        kept.settled().await;
        let mut dropped = cache.watch(&counting(keys.detail("a2"), &calls));
        dropped.settled().await;
        drop(dropped);

        cache.remove_queries(&keys.detail("a2"));
        assert!(cache.is_observed(&keys.detail("a1")));
        assert_eq!(lock(&cache.inner.observers).len(), 1);
        assert!(lock(&cache.inner.observers).contains_key(&keys.detail("a1")));
    }

    #[tokio::test]
    async fn settling_fetch_drops_abandoned_observer() {
        let cache = QueryCache::default();
        let key = ResourceKeys::new("agent").detail("a1");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let desc = QueryDescriptor::new(key.clone(), move || {
            let rx = lock(&release_rx).take();
            async move {
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok(json!({"id": "a1"}))
            }
        });

        drop(cache.watch(&desc));
        assert_eq!(lock(&cache.inner.observers).len(), 1);
        release_tx.send(()).unwrap();
        while cache.is_fetching(&key) {
            tokio::task::yield_now().await;
        }

        assert!(lock(&cache.inner.observers).is_empty());
        assert!(cache.entry(&key).is_some());
    }
}
