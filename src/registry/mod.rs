//! Stream registry: per-session lookup of in-flight response channels.
//!
//! The request that starts a streaming generation registers its
//! [`ResponseChannel`] here and hands the returned id to the client. A
//! second, independent request redeems the id with
//! [`ChannelRegistry::retrieve`], which removes the entry so no other caller
//! can obtain the same channel.
//!
//! # Bounds
//!
//! - **Capacity**: at most [`RegistryConfig::max_streams`] unredeemed
//!   channels; registering more evicts the oldest first.
//! - **Time**: a channel not redeemed within [`RegistryConfig::ttl`] of its
//!   registration is unreachable and gets evicted.
//!
//! Eviction (but not retrieval) cancels the channel, which stops the
//! generation task feeding it.
//!
//! [`SessionStore`] holds one registry per client session, created lazily.

mod session;

pub use session::{SessionConfig, SessionStore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;
use uuid::Uuid;

use crate::channel::ResponseChannel;
use crate::telemetry;
use crate::{Result, SkaldError};

/// Configuration for a [`ChannelRegistry`].
///
/// ```rust
/// # use skald::RegistryConfig;
/// # use std::time::Duration;
/// let config = RegistryConfig::new()
///     .max_streams(4)
///     .ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum unredeemed channels per session. Default: 10.
    pub max_streams: u64,
    /// Time a channel stays redeemable after registration. Default: 1 minute.
    pub ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_streams: 10,
            ttl: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of unredeemed channels.
    pub fn max_streams(mut self, n: u64) -> Self {
        self.max_streams = n;
        self
    }

    /// Set how long a channel stays redeemable.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Bounded map from stream id to [`ResponseChannel`], with single-consumption
/// retrieval.
pub struct ChannelRegistry {
    channels: Cache<String, Arc<Pending>>,
}

/// An unredeemed channel. Retrieval and eviction race for `claimed`; the
/// winner owns the channel.
struct Pending {
    channel: ResponseChannel,
    claimed: AtomicBool,
}

impl Pending {
    fn new(channel: ResponseChannel) -> Self {
        Self {
            channel,
            claimed: AtomicBool::new(false),
        }
    }

    /// True for exactly one caller.
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }
}

impl ChannelRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        let channels = Cache::builder()
            .max_capacity(config.max_streams)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(on_channel_removed)
            .build();
        Self { channels }
    }

    /// Register a channel under a fresh id and return the id.
    ///
    /// Applies the capacity bound immediately, so the oldest unredeemed
    /// channel is gone by the time this returns.
    pub fn register(&self, channel: &ResponseChannel) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        if !channel.assign_id(&id) {
            return Err(SkaldError::InvalidRequest(
                "response channel is already registered".into(),
            ));
        }
        self.channels
            .insert(id.clone(), Arc::new(Pending::new(channel.clone())));
        self.channels.run_pending_tasks();
        metrics::counter!(telemetry::CHANNELS_REGISTERED_TOTAL).increment(1);
        debug!(stream_id = %id, "response channel registered");
        Ok(id)
    }

    /// Look up and remove the channel for `id`.
    ///
    /// Unknown, already retrieved and expired ids all yield
    /// [`SkaldError::StreamNotFound`].
    pub fn retrieve(&self, id: &str) -> Result<ResponseChannel> {
        // `get` honours the TTL. Once claimed, a concurrent expiry of the
        // entry no longer cancels the channel.
        let pending = self
            .channels
            .get(id)
            .filter(|pending| pending.claim())
            .ok_or_else(|| SkaldError::StreamNotFound(id.to_owned()))?;
        self.channels.invalidate(id);
        Ok(pending.channel.clone())
    }

    /// Whether `id` is currently redeemable.
    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    /// Number of unredeemed channels.
    pub fn len(&self) -> u64 {
        self.channels.run_pending_tasks();
        self.channels.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict expired channels now instead of on the next registration.
    pub fn purge_expired(&self) {
        self.channels.run_pending_tasks();
    }

    /// Cancel and drop every unredeemed channel.
    pub fn close(&self) {
        for (_, pending) in self.channels.iter() {
            if pending.claim() {
                pending.channel.cancel();
            }
        }
        self.channels.invalidate_all();
        self.channels.run_pending_tasks();
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

fn on_channel_removed(id: Arc<String>, pending: Arc<Pending>, cause: RemovalCause) {
    if !cause.was_evicted() || !pending.claim() {
        return;
    }
    let cause = match cause {
        RemovalCause::Expired => "expired",
        _ => "size",
    };
    metrics::counter!(telemetry::CHANNELS_EVICTED_TOTAL, "cause" => cause).increment(1);
    debug!(stream_id = %id, cause, "unredeemed response channel evicted");
    pending.channel.cancel();
}
