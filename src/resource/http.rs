//! REST implementation of [`ResourceApi`].
//!
//! Conventions, relative to the resource path (e.g. `/agents`):
//!
//! | Call | Request |
//! |---|---|
//! | `list(q)` | `GET /agents?<q>` |
//! | `get(id)` | `GET /agents/{id}` |
//! | `create(dto)` | `POST /agents` |
//! | `update(id, dto)` | `PATCH /agents/{id}` |
//! | `remove(id)` | `DELETE /agents/{id}` |

use std::marker::PhantomData;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ListResponse, RemoveOutcome, ResourceApi};
use crate::client::{ApiClient, RequestInit};
use crate::{RestashError, Result};

/// [`ResourceApi`] over an [`ApiClient`].
///
/// `T` is the item type, `Q` the list query, `C` and `U` the create and
/// update payloads. All default to untyped JSON.
pub struct HttpResource<T, Q = Value, C = Value, U = Value> {
    client: ApiClient,
    path: String,
    _marker: PhantomData<fn() -> (T, Q, C, U)>,
}

impl<T, Q, C, U> std::fmt::Debug for HttpResource<T, Q, C, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<T, Q, C, U> HttpResource<T, Q, C, U> {
    pub fn new(client: ApiClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into().trim_end_matches('/').to_string(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Item path with `id` percent-encoded as a single path segment.
    fn item_path(&self, id: &str) -> Result<String> {
        if matches!(id, "." | "..") {
            return Err(RestashError::InvalidInput(format!(
                "id {id:?} cannot be used as a path segment"
            )));
        }
        let mut url = Url::parse("http://localhost/")
            .map_err(|e| RestashError::InvalidInput(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| RestashError::InvalidInput("cannot encode id".into()))?
            .pop_if_empty()
            .push(id);
        Ok(format!("{}{}", self.path, url.path()))
    }
}

/// Flatten list parameters into query-string pairs.
///
/// Strings are sent as-is, `null` members are dropped, other scalars use
/// their JSON rendering and nested values are sent as JSON text.
fn query_pairs<Q: Serialize>(query: &Q) -> Result<Vec<(String, String)>> {
    let value = serde_json::to_value(query)
        .map_err(|e| RestashError::InvalidInput(format!("failed to encode list query: {e}")))?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        other => Err(RestashError::InvalidInput(format!(
            "list query must serialize to an object, got {other}"
        ))),
    }
}

#[async_trait]
impl<T, Q, C, U> ResourceApi for HttpResource<T, Q, C, U>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    Q: Serialize + Clone + Send + Sync + 'static,
    C: Serialize + Send + Sync + 'static,
    U: Serialize + Send + Sync + 'static,
{
    type Item = T;
    type Query = Q;
    type Create = C;
    type Update = U;

    async fn list(&self, query: Option<&Q>) -> Result<ListResponse<T>> {
        let mut init = RequestInit::get();
        if let Some(query) = query {
            for (name, value) in query_pairs(query)? {
                init = init.query(name, value);
            }
        }
        self.client.request(&self.path, init).await?.into_json()
    }

    async fn get(&self, id: &str) -> Result<T> {
        self.client.get_json(&self.item_path(id)?).await
    }

    async fn create(&self, dto: &C) -> Result<T> {
        self.client.send_json(Method::POST, &self.path, dto).await
    }

    async fn update(&self, id: &str, dto: &U) -> Result<T> {
        self.client
            .send_json(Method::PATCH, &self.item_path(id)?, dto)
            .await
    }

    async fn remove(&self, id: &str) -> Result<RemoveOutcome<T>> {
        self.client
            .request(&self.item_path(id)?, RequestInit::delete())
            .await?
            .into_json()
    }
}
