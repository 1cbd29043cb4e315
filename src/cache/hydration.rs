//! Prefetching, dehydration and hydration.
//!
//! Prefetching runs descriptors ahead of interactive use (e.g. while a page
//! is rendered on the server). [`QueryCache::dehydrate`] then captures the
//! successful entries as a serializable [`DehydratedState`], and
//! [`QueryCache::hydrate`] restores it in another cache.
//!
//! Restored entries keep their ORIGINAL `updated_at`: an entry fetched at
//! `T` with a 60s window is fresh when hydrated at `T+5s` and already stale
//! when hydrated at `T+65s`. Clock continuity between the two sides is the
//! caller's concern.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::entry::{CacheEntry, EntryOutcome};
use super::{QueryCache, lock};
use crate::Result;
use crate::keys::QueryKey;
use crate::query::QueryDescriptor;

/// One successful entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DehydratedQuery {
    pub key: QueryKey,
    pub data: Value,
    /// Milliseconds since the Unix epoch when the data was fetched.
    pub updated_at: u64,
    /// Freshness window in milliseconds.
    pub freshness_ms: u64,
}

/// Transferable snapshot of a cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DehydratedState {
    pub queries: Vec<DehydratedQuery>,
}

impl QueryCache {
    /// Run a descriptor once and store the result (or error) in the cache.
    ///
    /// A fresh entry short-circuits; a disabled descriptor is skipped.
    pub async fn prefetch_query<T>(&self, descriptor: &QueryDescriptor<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if !descriptor.is_enabled() {
            return Ok(());
        }
        if let Some(entry) = self.entry(descriptor.key())
            && !entry.is_stale()
        {
            return Ok(());
        }
        self.inner
            .start_fetch(
                descriptor.key(),
                descriptor.erased(),
                descriptor.freshness_window(),
            )
            .await
            .map(|_| ())
    }

    /// Prefetch every descriptor in parallel and wait for all of them.
    ///
    /// One failure does not cancel the others. Outcomes are returned in input
    /// order. Use [`QueryDescriptor::into_json`] to mix descriptor types.
    #[instrument(skip_all)]
    pub async fn prefetch_all<T, I>(&self, descriptors: I) -> Vec<Result<()>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = QueryDescriptor<T>>,
    {
        let descriptors: Vec<_> = descriptors.into_iter().collect();
        let outcomes = join_all(descriptors.iter().map(|d| self.prefetch_query(d))).await;
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        debug!(total = outcomes.len(), failed, "prefetch finished");
        outcomes
    }

    /// Snapshot every successful entry, ordered by key.
    ///
    /// Error entries are not carried over; the receiving side fetches them
    /// again.
    pub fn dehydrate(&self) -> DehydratedState {
        let queries = self
            .entries()
            .into_iter()
            .filter_map(|entry| match entry.outcome {
                EntryOutcome::Data(data) => Some(DehydratedQuery {
                    key: entry.key,
                    data: Value::clone(&data),
                    updated_at: entry.updated_at,
                    freshness_ms: entry.freshness.as_millis() as u64,
                }),
                EntryOutcome::Error(_) => None,
            })
            .collect();
        DehydratedState { queries }
    }

    /// Restore a snapshot. Returns the number of entries written.
    ///
    /// An existing entry at least as recent as the snapshot's is kept.
    /// Live subscriptions on restored keys are notified.
    pub fn hydrate(&self, state: &DehydratedState) -> usize {
        let mut restored = 0;
        let observers = lock(&self.inner.observers);
        for query in &state.queries {
            if let Some(existing) = self.inner.entries.get(&query.key)
                && existing.updated_at >= query.updated_at
            {
                continue;
            }
            let data = Arc::new(query.data.clone());
            let entry = CacheEntry::new(
                query.key.clone(),
                EntryOutcome::Data(Arc::clone(&data)),
                query.updated_at,
                Duration::from_millis(query.freshness_ms),
            );
            self.inner.entries.insert(query.key.clone(), entry);
            if let Some(observer) = observers.get(&query.key).filter(|o| o.is_active()) {
                observer.tx.send_modify(|s| {
                    s.data = Some(Arc::clone(&data));
                    s.error = None;
                    s.updated_at = Some(query.updated_at);
                });
            }
            restored += 1;
        }
        debug!(restored, total = state.queries.len(), "hydrated cache");
        restored
    }
}
