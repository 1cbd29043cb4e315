//! Cache key builder.
//!
//! A [`QueryKey`] is an ordered sequence of JSON tokens. The first token is
//! always the resource name, so every key of a resource shares the prefix
//! returned by [`ResourceKeys::all`] and can be invalidated in bulk.
//!
//! Equality, hashing and ordering are defined on the canonical serialized
//! form. `serde_json` keeps object members sorted, so two structurally equal
//! parameter objects always produce the same key regardless of how they were
//! built.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::Result;

/// Category token shared by every list key.
///
/// `list(q)` reuses the `lists()` token so that `[R, "lists"]` is a token
/// prefix of every `[R, "lists", q]`. Invalidating `lists()` therefore
/// reaches every filtered list of the resource.
pub const LISTS_TOKEN: &str = "lists";
/// Category token shared by every detail key.
pub const DETAIL_TOKEN: &str = "detail";

/// Ordered token sequence identifying one cacheable query result.
#[derive(Clone)]
pub struct QueryKey {
    tokens: Vec<Value>,
    canonical: String,
}

impl QueryKey {
    /// Build a key from arbitrary tokens.
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::from_tokens(tokens.into_iter().map(Into::into).collect())
    }

    fn from_tokens(tokens: Vec<Value>) -> Self {
        let canonical = Value::Array(tokens.clone()).to_string();
        Self { tokens, canonical }
    }

    /// The tokens in order.
    pub fn tokens(&self) -> &[Value] {
        &self.tokens
    }

    /// Resource name (the first token), or `""` for an empty key.
    pub fn resource(&self) -> &str {
        self.tokens.first().and_then(Value::as_str).unwrap_or("")
    }

    /// Whether `prefix` matches the leading tokens of this key.
    ///
    /// Every key starts with itself and with the empty key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.tokens.len() >= prefix.tokens.len()
            && self.tokens[..prefix.tokens.len()] == prefix.tokens[..]
    }

    /// Canonical JSON rendering used for equality and ordering.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl Serialize for QueryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.tokens.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for QueryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<Value>::deserialize(deserializer).map(Self::from_tokens)
    }
}

/// Key namespace for one resource.
///
/// ```rust
/// # use restash::keys::ResourceKeys;
/// let keys = ResourceKeys::new("agent");
/// assert!(keys.detail("a1").starts_with(&keys.all()));
/// assert!(keys.list(None).starts_with(&keys.lists()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKeys {
    name: Arc<str>,
}

impl ResourceKeys {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `[R]`: matches every key of the resource.
    pub fn all(&self) -> QueryKey {
        QueryKey::new([self.name.as_ref()])
    }

    /// `[R, "lists"]`: matches every list key.
    pub fn lists(&self) -> QueryKey {
        QueryKey::new([self.name.as_ref(), LISTS_TOKEN])
    }

    /// `[R, "lists", Q]`, with an empty object when no parameters are given.
    ///
    /// Parameters are included verbatim; no normalization beyond the
    /// canonical member order of JSON objects.
    pub fn list(&self, params: Option<&Value>) -> QueryKey {
        let params = params
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        QueryKey::from_tokens(vec![
            Value::from(self.name.as_ref()),
            Value::from(LISTS_TOKEN),
            params,
        ])
    }

    /// Typed variant of [`list`](Self::list).
    pub fn list_for<Q: Serialize + ?Sized>(&self, params: Option<&Q>) -> Result<QueryKey> {
        let params = params.map(serde_json::to_value).transpose()?;
        Ok(self.list(params.as_ref()))
    }

    /// `[R, "detail", id]`.
    pub fn detail(&self, id: &str) -> QueryKey {
        QueryKey::new([self.name.as_ref(), DETAIL_TOKEN, id])
    }
}
