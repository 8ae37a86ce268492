use std::fmt;

/// Identifier of one cached result set.
///
/// A key is an ordered list of segments. `"super-heroes"` is a one-segment key
/// and `["super-hero", "1"]` a two-segment key; the latter is matched by the
/// prefix `"super-hero"` in [`QueryClient::invalidate_prefix`].
///
/// [`QueryClient::invalidate_prefix`]: super::QueryClient::invalidate_prefix
///
/// # Example
///
/// ```
/// use optimistic_query::query::QueryKey;
///
/// let list = QueryKey::from("super-heroes");
/// let detail = QueryKey::from(("super-hero", 1));
///
/// assert_eq!(detail.to_string(), "super-hero/1");
/// assert!(detail.starts_with(&QueryKey::from("super-hero")));
/// assert!(!list.starts_with(&QueryKey::from("super-hero")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Creates a key from its segments.
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The key's segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if `prefix`'s segments are a leading run of this key's.
    #[must_use]
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for QueryKey {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for QueryKey {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<&QueryKey> for QueryKey {
    fn from(key: &QueryKey) -> Self {
        key.clone()
    }
}

impl<A: fmt::Display, B: fmt::Display> From<(A, B)> for QueryKey {
    fn from((a, b): (A, B)) -> Self {
        Self(vec![a.to_string(), b.to_string()])
    }
}
