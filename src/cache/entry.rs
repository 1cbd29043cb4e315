//! Cache entries.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::RestashError;
use crate::keys::QueryKey;

/// Wall-clock milliseconds since the Unix epoch.
///
/// Entry timestamps are wall-clock so that they survive dehydration into
/// another process.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Settled result stored under a key.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Data(Arc<Value>),
    Error(RestashError),
}

/// One cached query result.
///
/// Owned by [`QueryCache`](super::QueryCache); callers only ever see copies.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub(crate) key: QueryKey,
    pub(crate) outcome: EntryOutcome,
    pub(crate) updated_at: u64,
    pub(crate) freshness: Duration,
    pub(crate) invalidated: bool,
}

impl CacheEntry {
    pub(crate) fn new(key: QueryKey, outcome: EntryOutcome, updated_at: u64, freshness: Duration) -> Self {
        Self {
            key,
            outcome,
            updated_at,
            freshness,
            invalidated: false,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn outcome(&self) -> &EntryOutcome {
        &self.outcome
    }

    /// Cached data, if the last fetch succeeded.
    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            EntryOutcome::Data(value) => Some(value),
            EntryOutcome::Error(_) => None,
        }
    }

    /// Error from the last fetch, if it failed.
    pub fn error(&self) -> Option<&RestashError> {
        match &self.outcome {
            EntryOutcome::Error(err) => Some(err),
            EntryOutcome::Data(_) => None,
        }
    }

    /// When the result settled (ms since the Unix epoch).
    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Whether an invalidation has marked this entry stale.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Stale when invalidated, when it holds an error, or once `freshness`
    /// has elapsed since `updated_at`.
    pub fn is_stale_at(&self, now_ms: u64) -> bool {
        if self.invalidated || matches!(self.outcome, EntryOutcome::Error(_)) {
            return true;
        }
        u128::from(now_ms.saturating_sub(self.updated_at)) >= self.freshness.as_millis()
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(now_millis())
    }
}
