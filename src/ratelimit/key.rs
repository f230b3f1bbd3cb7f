//! Storage key composition.

/// A key that uniquely identifies a rate-limited subject.
///
/// The key is the subject id, namespaced as `prefix:id` when the limiter
/// was configured with a non-empty prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimiterKey(String);

impl RateLimiterKey {
    /// Compose the key for `id` under an optional prefix.
    pub fn compose(prefix: Option<&str>, id: &str) -> Self {
        match prefix {
            Some(prefix) if !prefix.is_empty() => Self(format!("{}:{}", prefix, id)),
            _ => Self(id.to_string()),
        }
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for RateLimiterKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl AsRef<str> for RateLimiterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
