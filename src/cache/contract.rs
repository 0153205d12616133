//! Cache Store Contract (C2): the polymorphic interface every cache driver
//! implements, covering single-key, batch, counter, and tag operations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::value::CacheValue;
use crate::deadline::Deadline;
use crate::error::CacheResult;

/// Options recognized by `set`/`set_multiple`. Unset fields mean "no
/// expiration" / "no tags".
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub expiration: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// The polymorphic cache store contract. Every driver (in-memory,
/// external) and the multi-tier stack all implement this.
///
/// Every operation takes a [`Deadline`] as its first parameter:
/// a caller that needs to bound how long it will wait, or cancel
/// in-flight work outright, passes one in; a call with no such need
/// passes `&Deadline::none()` and the operation behaves exactly as if the
/// parameter didn't exist. No operation retries after its deadline is
/// exceeded or its token is cancelled.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value, or `ErrCacheMiss` if absent or expired. An
    /// expired item MUST behave as a miss even if still physically
    /// present.
    async fn get(&self, deadline: &Deadline, key: &str) -> CacheResult<CacheValue>;

    /// Stores the item, replacing any existing value for `key`. Setting
    /// with tags atomically updates the tag manager so tag-symmetry
    /// invariants hold once the call returns.
    async fn set(&self, deadline: &Deadline, key: &str, value: CacheValue, opts: SetOptions) -> CacheResult<()>;

    /// Idempotent: succeeds whether or not the key was present. Removes
    /// the key from every tag it was under. Returns whether a live item
    /// was actually removed (informational only — not a success/failure
    /// signal; the operation never fails on a missing key).
    async fn delete(&self, deadline: &Deadline, key: &str) -> CacheResult<bool>;

    /// Expired ⇒ false, never an error.
    async fn has(&self, deadline: &Deadline, key: &str) -> CacheResult<bool>;

    /// Removes all items; tag manager is reset.
    async fn clear(&self, deadline: &Deadline) -> CacheResult<()>;

    /// Present, non-expired items only; absent/expired keys are simply
    /// omitted from the result. An empty key list returns an empty map,
    /// not an error.
    async fn get_multiple(&self, deadline: &Deadline, keys: &[&str]) -> CacheResult<HashMap<String, CacheValue>>;

    /// Same semantics as `set`, applied uniformly to every entry.
    async fn set_multiple(
        &self,
        deadline: &Deadline,
        items: &[(&str, CacheValue)],
        opts: SetOptions,
    ) -> CacheResult<()>;

    /// Same semantics as `delete`, applied to every key. Returns the count
    /// of keys that were actually present.
    async fn delete_multiple(&self, deadline: &Deadline, keys: &[&str]) -> CacheResult<u64>;

    /// Atomic signed update. Absent key seeds at `delta`. A value that does
    /// not coerce to an integer (see `CacheValue::as_counter`) fails with
    /// `ErrInvalidValue` and leaves the stored value untouched. Expiration
    /// and tags are preserved across the update.
    async fn increment(&self, deadline: &Deadline, key: &str, delta: i64) -> CacheResult<i64>;

    /// `decrement(key, delta)` is `increment(key, -delta)`.
    async fn decrement(&self, deadline: &Deadline, key: &str, delta: i64) -> CacheResult<i64> {
        self.increment(deadline, key, delta.checked_neg().unwrap_or(i64::MIN)).await
    }

    /// All currently live items bound to `tag`.
    async fn tagged_get(&self, deadline: &Deadline, tag: &str) -> CacheResult<HashMap<String, CacheValue>>;

    /// Deletes every item bound to `tag` and removes the binding; other
    /// tags on affected keys are cleaned up so tag-symmetry invariants
    /// continue to hold. Returns the number of items deleted.
    async fn tagged_delete(&self, deadline: &Deadline, tag: &str) -> CacheResult<u64>;

    /// Number of live (non-expired) items.
    async fn count(&self, deadline: &Deadline) -> CacheResult<u64>;

    /// Alias for `clear`, provided as an operational no-return convenience.
    async fn flush(&self, deadline: &Deadline) -> CacheResult<()> {
        self.clear(deadline).await
    }
}
