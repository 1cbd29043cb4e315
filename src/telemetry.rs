//! Telemetry metric name constants.
//!
//! Centralised metric names for restash operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `restash_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `method` — HTTP method (e.g. "GET", "PATCH")
//! - `resource` — first token of the cache key (e.g. "agent")
//! - `status` — outcome: "ok" or "error"

/// Total HTTP requests issued by the request client.
///
/// Labels: `method`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "restash_requests_total";

/// HTTP request duration in seconds.
///
/// Labels: `method`.
pub const REQUEST_DURATION_SECONDS: &str = "restash_request_duration_seconds";

/// Total retry attempts (not counting the initial fetch).
///
/// Labels: `resource`.
pub const RETRIES_TOTAL: &str = "restash_retries_total";

/// Reads served from a fresh cache entry.
///
/// Labels: `resource`.
pub const CACHE_HITS_TOTAL: &str = "restash_cache_hits_total";

/// Reads that found no fresh entry.
///
/// Labels: `resource`.
pub const CACHE_MISSES_TOTAL: &str = "restash_cache_misses_total";

/// Fetches started by the cache (one per settled in-flight operation).
///
/// Labels: `resource`, `status` ("ok" | "error").
pub const FETCHES_TOTAL: &str = "restash_fetches_total";

/// Reads that attached to an already in-flight fetch.
///
/// Labels: `resource`.
pub const FETCHES_DEDUPLICATED_TOTAL: &str = "restash_fetches_deduplicated_total";

/// Cache entries marked stale by invalidation.
///
/// Labels: `resource`.
pub const INVALIDATIONS_TOTAL: &str = "restash_invalidations_total";
