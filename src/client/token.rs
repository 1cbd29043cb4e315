//! Bearer credential sources.

use std::future::Future;

use async_trait::async_trait;

/// Produces a currently valid bearer credential on demand.
///
/// [`ApiClient`](super::ApiClient) calls this before every request and never
/// caches the result, so an implementation backed by an identity provider
/// can refresh expired tokens transparently. `None` means "not signed in".
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// Fixed credential (or none). Useful for tests and service accounts.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// A provider that never yields a credential.
    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the credential from an environment variable on every call.
/// Empty values count as absent.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

/// Adapts an async closure into a [`TokenProvider`].
///
/// ```rust
/// # use restash::client::{TokenProvider, token_fn};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = token_fn(|| async { Some("session-token".to_string()) });
/// assert_eq!(provider.token().await.as_deref(), Some("session-token"));
/// # }
/// ```
pub fn token_fn<F, Fut>(f: F) -> FnTokenProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send,
{
    FnTokenProvider(f)
}

/// See [`token_fn`].
pub struct FnTokenProvider<F>(F);

#[async_trait]
impl<F, Fut> TokenProvider for FnTokenProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send,
{
    async fn token(&self) -> Option<String> {
        (self.0)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn static_token() {
        assert_eq!(StaticToken::new("t").token().await.as_deref(), Some("t"));
        assert_eq!(StaticToken::none().token().await, None);
    }

    #[tokio::test]
    async fn closure_is_invoked_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let provider = token_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Some(format!("token-{n}")) }
        });
        assert_eq!(provider.token().await.as_deref(), Some("token-0"));
        assert_eq!(provider.token().await.as_deref(), Some("token-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn env_token_treats_missing_as_absent() {
        let provider = EnvToken::new("RESTASH_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(provider.token().await, None);
    }
}
