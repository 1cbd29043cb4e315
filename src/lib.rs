//! Restash - cache-aware client for REST resources
//!
//! This crate layers a query cache over a bearer-token HTTP client so that
//! applications can read and write remote resources without hand-managing
//! cache keys, duplicate requests or staleness:
//!
//! - [`ResourceKeys`] builds hierarchical [`QueryKey`]s (`all` ⊃ `lists` ⊃
//!   `list(q)`, and `all` ⊃ `detail(id)`) so one prefix invalidates a family.
//! - [`QueryDescriptor`] pairs a key with a fetcher and a freshness window.
//! - [`QueryCache`] runs descriptors with per-key deduplication, exposes
//!   [`Subscription`]s, and refetches observed queries on invalidation.
//! - [`QueryCache::prefetch_all`], [`QueryCache::dehydrate`] and
//!   [`QueryCache::hydrate`] move a warmed cache from one process to another.
//! - [`ApiClient`] attaches a fresh credential from a [`TokenProvider`] to
//!   every request.
//! - [`Resource`] ties it together per resource with create/update/remove
//!   operations that invalidate the right keys.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use restash::{ApiClient, ClientConfig, EnvToken, HttpResource, QueryCache, Resource};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Agent {
//!     id: String,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> restash::Result<()> {
//!     let client = ApiClient::new(
//!         ClientConfig::new("https://api.example.com"),
//!         Arc::new(EnvToken::new("API_TOKEN")),
//!     )?;
//!     let cache = QueryCache::default();
//!     let agents = Resource::new(
//!         "agent",
//!         HttpResource::<Agent>::new(client, "/agents"),
//!         cache.clone(),
//!     );
//!
//!     let mut list = agents.watch_list(None)?;
//!     let page = list.settled().await;
//!     println!("{} agents", page.data.map(|p| p.items.len()).unwrap_or(0));
//!
//!     agents
//!         .create(&serde_json::json!({"name": "scout"}))
//!         .await?;
//!     // The list subscription refetches on its own.
//!     if let Some(state) = list.changed().await {
//!         println!("refetching: {}", state.is_fetching);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
#[cfg(feature = "cli")]
pub mod config;
pub mod error;
pub mod keys;
pub mod query;
pub mod resource;
pub mod retry;
pub mod telemetry;
pub mod version;

// Re-export main types at crate root
pub use cache::{
    CacheConfig, CacheEntry, DehydratedQuery, DehydratedState, QueryCache, QueryState,
    QueryStatus, Subscription,
};
pub use client::{ApiClient, ApiResponse, ClientConfig, EnvToken, RequestInit, StaticToken, TokenProvider};
pub use error::{RestashError, Result};
pub use keys::{QueryKey, ResourceKeys};
pub use query::{DEFAULT_FRESHNESS, Fetcher, QueryDescriptor};
pub use resource::{HttpResource, ListResponse, Page, RemoveOutcome, Resource, ResourceApi};
pub use retry::RetryConfig;
pub use version::{PKG_VERSION, version_string};
