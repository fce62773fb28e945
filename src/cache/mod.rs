//! Process-wide result cache for completed generations.
//!
//! [`ResultCache`] deduplicates identical generation requests across
//! unrelated callers. Only finished, synchronous results go in; partial
//! text from a stream never does.
//!
//! # Expiry
//!
//! Every entry carries two independent clocks:
//!
//! - **time to idle** restarts on every hit and on `put`;
//! - **time to live** restarts only on `put`.
//!
//! Whichever runs out first evicts the entry. Above
//! [`CacheConfig::max_entries`], the least recently used entry goes first.
//!
//! The cache is backed by moka's concurrent map, so lookups from many
//! request tasks don't serialise on a single lock.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::telemetry;

/// Configuration for a [`ResultCache`].
///
/// ```rust
/// # use skald::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(1_000)
///     .time_to_idle(Duration::from_secs(600))
///     .time_to_live(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached results. Default: 128.
    pub max_entries: u64,
    /// Expiry measured from the last hit or write. Default: 30 minutes.
    pub time_to_idle: Duration,
    /// Expiry measured from the write. Default: 2 hours.
    pub time_to_live: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 128,
            time_to_idle: Duration::from_secs(30 * 60),
            time_to_live: Duration::from_secs(120 * 60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached results.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the expiry since last access.
    pub fn time_to_idle(mut self, d: Duration) -> Self {
        self.time_to_idle = d;
        self
    }

    /// Set the expiry since write.
    pub fn time_to_live(mut self, d: Duration) -> Self {
        self.time_to_live = d;
        self
    }
}

/// Cache key of a translation: everything that determines its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranslationKey {
    pub source_language: String,
    pub target_language: String,
    pub text: String,
}

impl TranslationKey {
    pub fn new(
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_language: source_language.into(),
            target_language: target_language.into(),
            text: text.into(),
        }
    }
}

/// Bounded key → text cache with access- and write-based expiry.
///
/// Cheap to share: wrap it in an `Arc` or hand out references. All methods
/// take `&self`.
pub struct ResultCache<K = TranslationKey>
where
    K: Hash + Eq + Send + Sync + Debug + 'static,
{
    entries: Cache<K, String>,
}

impl<K> ResultCache<K>
where
    K: Hash + Eq + Send + Sync + Debug + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_idle(config.time_to_idle)
            .time_to_live(config.time_to_live)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|key: Arc<K>, _value: String, cause: RemovalCause| {
                if cause.was_evicted() {
                    let cause = match cause {
                        RemovalCause::Expired => "expired",
                        _ => "size",
                    };
                    metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "cause" => cause)
                        .increment(1);
                    debug!(key = ?key, cause, "cached result evicted");
                }
            })
            .build();
        Self { entries }
    }

    /// Look up a cached result, restarting its idle clock on a hit.
    ///
    /// Emits cache hit/miss metrics.
    pub fn get(&self, key: &K) -> Option<String> {
        match self.entries.get(key) {
            Some(value) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(value)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Insert or overwrite a result. Both expiry clocks restart.
    pub fn put(&self, key: K, value: impl Into<String>) {
        self.entries.insert(key, value.into());
        self.entries.run_pending_tasks();
    }

    /// Drop a single entry.
    pub fn invalidate(&self, key: &K) {
        self.entries.invalidate(key);
    }

    /// Number of live entries.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run expiry now instead of lazily on the next write.
    pub fn purge_expired(&self) {
        self.entries.run_pending_tasks();
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }
}

impl<K> Default for ResultCache<K>
where
    K: Hash + Eq + Send + Sync + Debug + 'static,
{
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
