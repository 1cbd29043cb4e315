//! Generic resource client.
//!
//! [`Resource`] turns a resource name plus a [`ResourceApi`] implementation
//! into cache keys, query descriptors, subscriptions and write operations
//! with a fixed invalidation policy:
//!
//! | Operation | Backend call | On success, invalidate |
//! |---|---|---|
//! | [`create`](Resource::create) | `create(dto)` | `all(R)` |
//! | [`update`](Resource::update) | `update(id, dto)` | `detail(R, id)` and `lists(R)` |
//! | [`remove`](Resource::remove) | `remove(id)` | `all(R)` |
//!
//! Writes never touch cached data directly. Subscribed reads pick up the
//! change through the refetch that invalidation triggers, so the next data a
//! subscriber sees always comes from a round-trip made after the write.

pub mod http;

pub use http::HttpResource;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::cache::{QueryCache, Subscription};
use crate::keys::ResourceKeys;
use crate::query::QueryDescriptor;
use crate::{RestashError, Result};

/// List payload as returned by a backend: a bare array or an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Items(Vec<T>),
    Paged {
        items: Vec<T>,
        #[serde(default)]
        total: Option<u64>,
    },
}

/// Normalized list result, the single shape stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
}

impl<T> From<ListResponse<T>> for Page<T> {
    fn from(response: ListResponse<T>) -> Self {
        match response {
            ListResponse::Items(items) => Page { items, total: None },
            ListResponse::Paged { items, total } => Page { items, total },
        }
    }
}

/// What a backend may answer to a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoveOutcome<T> {
    Ack { success: bool },
    Item(T),
    Empty,
}

/// Remote CRUD contract for one resource.
///
/// Any backend satisfying it works with [`Resource`]; see [`HttpResource`]
/// for the REST implementation.
#[async_trait]
pub trait ResourceApi: Send + Sync + 'static {
    type Item: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Parameters accepted by `list`. Must be plain, structurally comparable
    /// data: it becomes part of the cache key.
    type Query: Serialize + Clone + Send + Sync + 'static;
    type Create: Serialize + Send + Sync;
    type Update: Serialize + Send + Sync;

    async fn list(&self, query: Option<&Self::Query>) -> Result<ListResponse<Self::Item>>;

    async fn get(&self, id: &str) -> Result<Self::Item>;

    async fn create(&self, dto: &Self::Create) -> Result<Self::Item>;

    async fn update(&self, id: &str, dto: &Self::Update) -> Result<Self::Item>;

    async fn remove(&self, id: &str) -> Result<RemoveOutcome<Self::Item>>;
}

/// Cache-aware client for one resource.
///
/// Declared once per resource and cheap to clone.
pub struct Resource<A: ResourceApi> {
    keys: ResourceKeys,
    api: Arc<A>,
    cache: QueryCache,
    freshness: Duration,
}

impl<A: ResourceApi> Clone for Resource<A> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            api: Arc::clone(&self.api),
            cache: self.cache.clone(),
            freshness: self.freshness,
        }
    }
}

impl<A: ResourceApi> std::fmt::Debug for Resource<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.keys.name())
            .field("freshness", &self.freshness)
            .finish_non_exhaustive()
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(RestashError::InvalidInput("empty resource id".into()));
    }
    Ok(())
}

impl<A: ResourceApi> Resource<A> {
    /// Bind `api` under `name` to `cache`. Freshness defaults to the cache's
    /// [`default_freshness`](crate::CacheConfig::default_freshness).
    pub fn new(name: impl Into<Arc<str>>, api: A, cache: QueryCache) -> Self {
        let freshness = cache.config().default_freshness;
        Self {
            keys: ResourceKeys::new(name),
            api: Arc::new(api),
            cache,
            freshness,
        }
    }

    /// Override the freshness window of this resource's queries.
    pub fn freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn name(&self) -> &str {
        self.keys.name()
    }

    pub fn keys(&self) -> &ResourceKeys {
        &self.keys
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    // ========================================================================
    // Descriptors
    // ========================================================================

    /// Descriptor for `list(query)`. Fails only if the query cannot be
    /// serialized into a key.
    pub fn list_query(&self, query: Option<A::Query>) -> Result<QueryDescriptor<Page<A::Item>>> {
        let key = self.keys.list_for(query.as_ref())?;
        let api = Arc::clone(&self.api);
        Ok(QueryDescriptor::new(key, move || {
            let api = Arc::clone(&api);
            let query = query.clone();
            async move { api.list(query.as_ref()).await.map(Page::from) }
        })
        .freshness(self.freshness))
    }

    /// Descriptor for `get(id)`; disabled when `id` is empty.
    pub fn detail_query(&self, id: &str) -> QueryDescriptor<A::Item> {
        let api = Arc::clone(&self.api);
        let owned = id.to_string();
        QueryDescriptor::new(self.keys.detail(id), move || {
            let api = Arc::clone(&api);
            let id = owned.clone();
            async move { api.get(&id).await }
        })
        .freshness(self.freshness)
        .enabled(!id.is_empty())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Subscribe to `list(query)`.
    pub fn watch_list(&self, query: Option<A::Query>) -> Result<Subscription<Page<A::Item>>> {
        Ok(self.cache.watch(&self.list_query(query)?))
    }

    /// Subscribe to `get(id)`. Stays idle while `id` is empty.
    pub fn watch_detail(&self, id: &str) -> Subscription<A::Item> {
        self.cache.watch(&self.detail_query(id))
    }

    /// Fresh cached list, or fetch it.
    pub async fn fetch_list(&self, query: Option<A::Query>) -> Result<Page<A::Item>> {
        self.cache.fetch_query(&self.list_query(query)?).await
    }

    /// Fresh cached item, or fetch it.
    pub async fn fetch_detail(&self, id: &str) -> Result<A::Item> {
        require_id(id)?;
        self.cache.fetch_query(&self.detail_query(id)).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create an item, then invalidate every key of the resource.
    #[instrument(skip_all, fields(resource = %self.keys.name()))]
    pub async fn create(&self, dto: &A::Create) -> Result<A::Item> {
        let item = self.api.create(dto).await?;
        let stale = self.cache.invalidate(&self.keys.all());
        info!(stale, "created");
        Ok(item)
    }

    /// Update an item, then invalidate its detail key and every list key.
    #[instrument(skip_all, fields(resource = %self.keys.name(), id = %id))]
    pub async fn update(&self, id: &str, dto: &A::Update) -> Result<A::Item> {
        require_id(id)?;
        let item = self.api.update(id, dto).await?;
        let stale = self
            .cache
            .invalidate_many(&[self.keys.detail(id), self.keys.lists()]);
        info!(stale, "updated");
        Ok(item)
    }

    /// Delete an item, then invalidate every key of the resource.
    #[instrument(skip_all, fields(resource = %self.keys.name(), id = %id))]
    pub async fn remove(&self, id: &str) -> Result<RemoveOutcome<A::Item>> {
        require_id(id)?;
        let outcome = self.api.remove(id).await?;
        let stale = self.cache.invalidate(&self.keys.all());
        info!(stale, "removed");
        Ok(outcome)
    }
}
