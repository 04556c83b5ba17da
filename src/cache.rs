//! TTL-bounded store for percentage values.
//!
//! [`PercentageCache`] is the storage seam: the resolver only talks to the trait so
//! a remote backend can replace [`InMemoryCache`]. Backends report their own
//! failures through [`CacheError`]; the resolver treats those as non-fatal.
//!
//! Contract:
//! - `put` overwrites unconditionally and sets expiry to `now + ttl`.
//! - `get` returns `None` for missing *and* expired keys. An expired entry is never
//!   returned even if it has not been purged yet.
//! - `evict` is a no-op for missing keys.

use crate::clock::{Clock, MonotonicClock};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// A cache backend failed. The message is backend specific.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cache backend unavailable: {0}")]
pub struct CacheError(pub String);

/// Key/value storage for percentages with per-entry expiry.
///
/// Errors are reported to the caller, which logs them and carries on. A `get`
/// that fails is treated the same as a miss.
#[async_trait]
pub trait PercentageCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous entry. It expires `ttl` from now.
    async fn put(&self, key: &str, value: Decimal, ttl: Duration) -> Result<(), CacheError>;

    /// Current value for `key`. Missing and expired entries are both `None`.
    async fn get(&self, key: &str) -> Result<Option<Decimal>, CacheError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn evict(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<T> PercentageCache for Arc<T>
where
    T: PercentageCache + ?Sized,
{
    async fn put(&self, key: &str, value: Decimal, ttl: Duration) -> Result<(), CacheError> {
        (**self).put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Decimal>, CacheError> {
        (**self).get(key).await
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        (**self).evict(key).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    value: Decimal,
    expires_at: u64,
}

/// In-process cache. Each key lives in its own map slot, so a reader sees either
/// the previous or the new entry, never a mix.
#[derive(Debug, Clone)]
pub struct InMemoryCache<C = MonotonicClock> {
    entries: Arc<DashMap<String, Entry>>,
    clock: C,
}

impl InMemoryCache<MonotonicClock> {
    /// Cache reading time from a fresh [`MonotonicClock`].
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl Default for InMemoryCache<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryCache<C> {
    /// Cache reading time from `clock`.
    ///
    /// Tests pass a [`ManualClock`](crate::ManualClock) to step through expiry.
    pub fn with_clock(clock: C) -> Self {
        Self { entries: Arc::new(DashMap::new()), clock }
    }

    /// Physically stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are stored, expired or not.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = self.clock.now_millis();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn put_sync(&self, key: &str, value: Decimal, ttl: Duration) {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_millis().saturating_add(ttl_ms);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
    }

    fn get_sync(&self, key: &str) -> Option<Decimal> {
        let now = self.clock.now_millis();
        let entry = *self.entries.get(key)?;
        if entry.expires_at > now {
            return Some(entry.value);
        }
        // Only drop the entry we judged expired; a concurrent put may have replaced it.
        self.entries.remove_if(key, |_, current| *current == entry);
        None
    }
}

#[async_trait]
impl<C: Clock> PercentageCache for InMemoryCache<C> {
    async fn put(&self, key: &str, value: Decimal, ttl: Duration) -> Result<(), CacheError> {
        self.put_sync(key, value, ttl);
        tracing::debug!(key, %value, ttl_secs = ttl.as_secs(), "percentage cached");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Decimal>, CacheError> {
        Ok(self.get_sync(key))
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
