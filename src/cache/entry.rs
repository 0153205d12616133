use super::value::CacheValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The value unit of the cache subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    pub value: CacheValue,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// `None` means no expiry. A zero-duration expiration is treated the
    /// same as no expiry, but we model the no-expiry case as `None` rather
    /// than `Some(Duration::ZERO)` to keep the common "never expires" path
    /// a single branch.
    pub expiration: Option<Duration>,
    pub tags: Vec<String>,
}

impl CacheItem {
    pub fn new(value: CacheValue, expiration: Option<Duration>) -> Self {
        Self {
            value,
            created_at: chrono::Utc::now(),
            expiration,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// `created_at + expiration` defines the expiry instant. Expired items
    /// are never observable through reads even before physical deletion —
    /// reclamation is handled separately by a lazy check on every access.
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(ttl) if !ttl.is_zero() => {
                let elapsed = chrono::Utc::now().signed_duration_since(self.created_at);
                elapsed.to_std().unwrap_or(Duration::ZERO) > ttl
            }
            _ => false,
        }
    }

    /// Remaining time-to-live, if the item carries an expiration and has
    /// not yet expired. Used to preserve TTL across `Increment`/`Decrement`.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let ttl = self.expiration?;
        if ttl.is_zero() {
            return None;
        }
        let elapsed = chrono::Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        ttl.checked_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_without_expiration_never_expires() {
        let item = CacheItem::new(CacheValue::Int(1), None);
        assert!(!item.is_expired());
    }

    #[test]
    fn item_with_zero_duration_never_expires() {
        let item = CacheItem::new(CacheValue::Int(1), Some(Duration::ZERO));
        assert!(!item.is_expired());
    }

    #[test]
    fn item_expires_after_ttl_elapses() {
        let mut item = CacheItem::new(CacheValue::Int(1), Some(Duration::from_millis(10)));
        item.created_at = chrono::Utc::now() - chrono::Duration::milliseconds(50);
        assert!(item.is_expired());
    }
}
