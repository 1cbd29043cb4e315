//! Token-backed HTTP request client.
//!
//! [`ApiClient::request`] asks the [`TokenProvider`] for a credential before
//! every call and fails with [`RestashError::Auth`] without touching the
//! network when there is none. Responses are classified by status and
//! content type:
//!
//! - non-2xx → [`RestashError::HttpStatus`] with the best-effort body text
//! - `204 No Content` → [`ApiResponse::Empty`]
//! - JSON content type → [`ApiResponse::Json`]
//! - anything else → [`ApiResponse::Text`]

pub mod token;

pub use token::{EnvToken, FnTokenProvider, StaticToken, TokenProvider, token_fn};

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::telemetry;
use crate::{RestashError, Result};

/// HTTP client configuration.
///
/// ```rust
/// # use restash::ClientConfig;
/// # use std::time::Duration;
/// let config = ClientConfig::new("https://api.example.com")
///     .timeout(Duration::from_secs(10));
/// assert_eq!(config.base_url, "https://api.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Prefix for relative request paths.
    pub base_url: String,
    /// Transport timeout per request. Default: 30s.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-request transport timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Method, query string, body and extra headers of one request.
#[derive(Debug, Clone)]
pub struct RequestInit {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestInit {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestInit {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).json(body)
    }

    pub fn patch(body: Value) -> Self {
        Self::new(Method::PATCH).json(body)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Append a query-string parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header. A `Content-Type` given here replaces the JSON default.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// `204 No Content`.
    Empty,
    Json(Value),
    Text(String),
}

impl ApiResponse {
    /// Decode into `T`.
    ///
    /// `Empty` decodes as JSON `null` (so `()` and `Option<_>` accept it).
    /// `Text` is parsed as JSON as a last resort; blank text counts as empty.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            ApiResponse::Empty => Ok(T::deserialize(Value::Null)?),
            ApiResponse::Text(text) if text.trim().is_empty() => Ok(T::deserialize(Value::Null)?),
            ApiResponse::Json(value) => Ok(T::deserialize(value)?),
            ApiResponse::Text(text) => serde_json::from_str(&text).map_err(|e| {
                RestashError::Decode(format!("expected JSON, got text response: {e}"))
            }),
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|mime| mime == "application/json" || mime.ends_with("+json"))
}

/// HTTP client that authenticates every request with a fresh bearer token.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RestashError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Issue one authenticated request.
    #[instrument(skip_all, fields(method = %init.method, path = %path))]
    pub async fn request(&self, path: &str, init: RequestInit) -> Result<ApiResponse> {
        let Some(token) = self.tokens.token().await else {
            warn!(path, "no credential available, request not sent");
            return Err(RestashError::Auth);
        };

        let method_label = init.method.as_str().to_owned();
        let mut builder = self
            .http
            .request(init.method, self.url(path))
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if !init
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
        {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if !init.query.is_empty() {
            builder = builder.query(&init.query);
        }
        for (name, value) in &init.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &init.body {
            builder = builder.body(body.to_string());
        }

        let start = Instant::now();
        let result = self.execute(builder).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "method" => method_label.clone(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "method" => method_label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let response = builder
            .send()
            .await
            .map_err(|e| RestashError::Network(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "request failed");
            return Err(RestashError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(ApiResponse::Empty);
        }

        if is_json(response.headers()) {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| RestashError::Network(e.to_string()))?;
            if bytes.is_empty() {
                return Ok(ApiResponse::Empty);
            }
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| RestashError::Decode(format!("invalid JSON body: {e}")))?;
            Ok(ApiResponse::Json(value))
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| RestashError::Network(e.to_string()))?;
            Ok(ApiResponse::Text(text))
        }
    }

    /// `GET path` decoded into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(path, RequestInit::get()).await?.into_json()
    }

    /// Send `body` as JSON with `method` and decode the response into `T`.
    pub async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| RestashError::InvalidInput(format!("failed to encode body: {e}")))?;
        self.request(path, RequestInit::new(method).json(body))
            .await?
            .into_json()
    }
}
