use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

/// A value restored from the cache, with its expiry metadata and the
/// secondary index value it was registered under, if any.
#[derive(Debug, Clone)]
pub struct CachedItem {
    pub value: Value,
    pub expires_at: Option<OffsetDateTime>,
    pub secondary_key: Option<String>,
}

impl CachedItem {
    /// Remaining time to live. `None` means the entry never expires.
    pub fn remaining_ttl(&self) -> Option<time::Duration> {
        self.expires_at.map(|at| at - OffsetDateTime::now_utc())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}
