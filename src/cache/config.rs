use std::time::Duration;

use serde::Deserialize;

const DEFAULT_KEY_PREFIX: &str = "stanza";
const DEFAULT_OP_TIMEOUT_SECS: u64 = 10;

/// Overlay cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether the facade wraps the backing store in an overlay cache.
    pub enabled: bool,
    /// Keyspace prefix, allowing several logical stores to share one
    /// physical cache without collision.
    pub key_prefix: String,
    /// TTL in seconds applied to cached items. `None` keeps entries until
    /// they are invalidated; list entries rely on proactive invalidation
    /// rather than expiry either way.
    pub item_ttl_seconds: Option<u64>,
    /// Upper bound on a single cache operation. Generous on purpose: a slow
    /// cache should degrade to a backing-store read, not fail the request.
    pub op_timeout_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            item_ttl_seconds: None,
            op_timeout_seconds: DEFAULT_OP_TIMEOUT_SECS,
        }
    }
}

impl CacheConfig {
    pub fn item_ttl(&self) -> Option<Duration> {
        self.item_ttl_seconds.map(Duration::from_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_enabled_with_indefinite_ttl() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.item_ttl(), None);
        assert_eq!(config.op_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn op_timeout_has_a_floor() {
        let config = CacheConfig {
            op_timeout_seconds: 0,
            ..CacheConfig::default()
        };
        assert_eq!(config.op_timeout(), Duration::from_secs(1));
    }
}
