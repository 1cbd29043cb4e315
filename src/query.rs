//! Query descriptors.
//!
//! A [`QueryDescriptor`] is an inert "what to fetch and how to cache it"
//! value: a [`QueryKey`], a fetch function and a freshness window. Building
//! one performs no I/O. The same descriptor drives imperative prefetching
//! ([`QueryCache::prefetch_query`](crate::QueryCache::prefetch_query)) and
//! reactive subscriptions ([`QueryCache::watch`](crate::QueryCache::watch)).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::keys::QueryKey;
use crate::{RestashError, Result};

/// How long a successful result counts as fresh unless overridden.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60);

/// Shared, re-invocable fetch function.
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Fetch function with its output already converted to JSON, as stored
/// alongside cache observers.
pub(crate) type ErasedFetcher = Fetcher<Value>;

/// Declarative description of one cacheable query.
pub struct QueryDescriptor<T> {
    key: QueryKey,
    fetch: Fetcher<T>,
    freshness: Duration,
    enabled: bool,
}

impl<T> Clone for QueryDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetch: Arc::clone(&self.fetch),
            freshness: self.freshness,
            enabled: self.enabled,
        }
    }
}

impl<T> fmt::Debug for QueryDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDescriptor")
            .field("key", &self.key)
            .field("freshness", &self.freshness)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> QueryDescriptor<T> {
    /// Describe a query. Enabled, with [`DEFAULT_FRESHNESS`].
    pub fn new<F, Fut>(key: QueryKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key,
            fetch: Arc::new(move || fetch().boxed()),
            freshness: DEFAULT_FRESHNESS,
            enabled: true,
        }
    }

    /// Set how long a successful result stays fresh.
    pub fn freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Enable or disable fetching. A disabled descriptor never fetches.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Invoke the fetch function once.
    pub fn fetch(&self) -> BoxFuture<'static, Result<T>> {
        (self.fetch)()
    }
}

impl<T: Serialize + Send + 'static> QueryDescriptor<T> {
    /// Convert into a JSON-typed descriptor with the same key, freshness and
    /// enabled flag, so descriptors of different types can be prefetched
    /// together.
    pub fn into_json(self) -> QueryDescriptor<Value> {
        QueryDescriptor {
            fetch: self.erased(),
            key: self.key,
            freshness: self.freshness,
            enabled: self.enabled,
        }
    }

    /// Wrap the fetcher so it yields JSON for the cache store.
    pub(crate) fn erased(&self) -> ErasedFetcher {
        let fetch = Arc::clone(&self.fetch);
        Arc::new(move || {
            let fut = fetch();
            async move {
                let item = fut.await?;
                serde_json::to_value(item).map_err(RestashError::from)
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ResourceKeys;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn building_a_descriptor_is_inert() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let desc = QueryDescriptor::new(ResourceKeys::new("agent").all(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(1u32) }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(desc.is_enabled());
        assert_eq!(desc.freshness_window(), DEFAULT_FRESHNESS);
    }

    #[tokio::test]
    async fn fetch_invokes_function_each_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let desc = QueryDescriptor::new(ResourceKeys::new("agent").all(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        })
        .freshness(Duration::from_secs(5));

        assert_eq!(desc.fetch().await.unwrap(), 0);
        assert_eq!(desc.clone().fetch().await.unwrap(), 1);
        assert_eq!(desc.freshness_window(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn erased_fetch_yields_json() {
        let desc = QueryDescriptor::new(ResourceKeys::new("agent").detail("a1"), || async {
            Ok(vec!["x".to_string()])
        });
        let value = (desc.erased())().await.unwrap();
        assert_eq!(value, serde_json::json!(["x"]));
    }
}
