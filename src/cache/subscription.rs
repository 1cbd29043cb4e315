//! Reactive read handles.
//!
//! Every subscribed key owns one `watch` channel. Each [`Subscription`] holds
//! a receiver; the cache treats a key as observed while at least one receiver
//! is alive. Dropping the last subscription does not cancel an in-flight
//! fetch.

use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::entry::{CacheEntry, EntryOutcome};
use crate::RestashError;
use crate::keys::QueryKey;

/// Untyped state broadcast to subscribers of one key.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawState {
    pub(crate) data: Option<Arc<Value>>,
    pub(crate) error: Option<RestashError>,
    pub(crate) updated_at: Option<u64>,
    pub(crate) is_fetching: bool,
}

impl RawState {
    pub(crate) fn from_entry(entry: Option<&CacheEntry>, is_fetching: bool) -> Self {
        let mut state = RawState {
            is_fetching,
            ..Default::default()
        };
        if let Some(entry) = entry {
            state.updated_at = Some(entry.updated_at);
            match &entry.outcome {
                EntryOutcome::Data(value) => state.data = Some(Arc::clone(value)),
                EntryOutcome::Error(err) => state.error = Some(err.clone()),
            }
        }
        state
    }
}

/// Lifecycle of a subscribed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Nothing fetched and nothing fetching (e.g. a disabled detail query).
    Idle,
    /// First fetch in progress; no data yet.
    Loading,
    /// Data available and the last fetch succeeded.
    Success,
    /// The last fetch failed. Earlier data, if any, is still exposed.
    Error,
}

/// Typed snapshot of a subscribed query.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<RestashError>,
    /// A fetch (first load or background refetch) is in progress.
    pub is_fetching: bool,
    /// When the displayed result settled (ms since the Unix epoch).
    pub updated_at: Option<u64>,
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

fn decode<T: DeserializeOwned>(raw: &RawState) -> QueryState<T> {
    let mut error = raw.error.clone();
    let data = match raw.data.as_deref().map(T::deserialize) {
        Some(Ok(data)) => Some(data),
        Some(Err(e)) => {
            error.get_or_insert(RestashError::Decode(e.to_string()));
            None
        }
        None => None,
    };
    let status = if error.is_some() {
        QueryStatus::Error
    } else if data.is_some() {
        QueryStatus::Success
    } else if raw.is_fetching {
        QueryStatus::Loading
    } else {
        QueryStatus::Idle
    };
    QueryState {
        status,
        data,
        error,
        is_fetching: raw.is_fetching,
        updated_at: raw.updated_at,
    }
}

/// Live view of one cache key.
///
/// Obtained from [`QueryCache::watch`](super::QueryCache::watch) or the
/// resource helpers. Re-renders are driven by awaiting
/// [`changed`](Self::changed) or consuming [`into_stream`](Self::into_stream).
pub struct Subscription<T> {
    key: QueryKey,
    rx: watch::Receiver<RawState>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> Subscription<T> {
    pub(crate) fn new(key: QueryKey, rx: watch::Receiver<RawState>) -> Self {
        Self {
            key,
            rx,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current state without waiting.
    pub fn current(&self) -> QueryState<T> {
        decode(&self.rx.borrow())
    }

    /// Wait for the next state change.
    ///
    /// Returns `None` once the cache has dropped this key's observers
    /// (see [`QueryCache::clear`](super::QueryCache::clear)).
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.rx.changed().await.ok()?;
        Some(decode(&self.rx.borrow_and_update()))
    }

    /// Wait until no fetch is in progress and return that state.
    pub async fn settled(&mut self) -> QueryState<T> {
        let settled = match self.rx.wait_for(|state| !state.is_fetching).await {
            Ok(state) => Some(decode(&state)),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.current())
    }

    /// Stream of states, starting with the current one.
    pub fn into_stream(self) -> impl Stream<Item = QueryState<T>> {
        WatchStream::new(self.rx).map(|raw| decode(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_derivation() {
        let idle: QueryState<u32> = decode(&RawState::default());
        assert_eq!(idle.status, QueryStatus::Idle);

        let loading: QueryState<u32> = decode(&RawState {
            is_fetching: true,
            ..Default::default()
        });
        assert!(loading.is_loading());

        let success: QueryState<u32> = decode(&RawState {
            data: Some(Arc::new(json!(7))),
            is_fetching: true,
            ..Default::default()
        });
        assert!(success.is_success());
        assert_eq!(success.data, Some(7));
        assert!(success.is_fetching);

        let failed: QueryState<u32> = decode(&RawState {
            data: Some(Arc::new(json!(7))),
            error: Some(RestashError::Network("down".into())),
            ..Default::default()
        });
        assert!(failed.is_error());
        assert_eq!(failed.data, Some(7));
    }

    #[test]
    fn shape_mismatch_surfaces_as_decode_error() {
        let state: QueryState<Vec<String>> = decode(&RawState {
            data: Some(Arc::new(json!({"not": "a list"}))),
            ..Default::default()
        });
        assert!(state.is_error());
        assert!(matches!(state.error, Some(RestashError::Decode(_))));
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn settled_waits_for_fetch_to_finish() {
        let tx = watch::Sender::new(RawState {
            is_fetching: true,
            ..Default::default()
        });
        let mut sub: Subscription<u32> = Subscription::new(QueryKey::new(["agent"]), tx.subscribe());
        let settle = tokio::spawn(async move { sub.settled().await });
        tokio::task::yield_now().await;
        tx.send_replace(RawState {
            data: Some(Arc::new(json!(3))),
            updated_at: Some(1),
            ..Default::default()
        });
        let state = settle.await.unwrap();
        assert!(state.is_success());
        assert_eq!(state.data, Some(3));
    }

    #[tokio::test]
    async fn settled_returns_last_state_when_cache_drops_key() {
        let tx = watch::Sender::new(RawState {
            data: Some(Arc::new(json!(5))),
            is_fetching: true,
            ..Default::default()
        });
        let mut sub: Subscription<u32> = Subscription::new(QueryKey::new(["agent"]), tx.subscribe());
        drop(tx);
        let state = sub.settled().await;
        assert_eq!(state.data, Some(5));
        assert!(state.is_fetching);
    }
}
