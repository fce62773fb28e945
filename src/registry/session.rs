//! Session-scoped holder of [`ChannelRegistry`] instances.

use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::debug;

use super::{ChannelRegistry, RegistryConfig};

/// Configuration for a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle this long are dropped with their registry. Default: 30 minutes.
    pub idle_timeout: Duration,
    /// Maximum number of tracked sessions. Default: 10,000.
    pub max_sessions: u64,
    /// Bounds applied to every session's registry.
    pub registry: RegistryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 10_000,
            registry: RegistryConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn max_sessions(mut self, n: u64) -> Self {
        self.max_sessions = n;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

/// Maps client session ids to their [`ChannelRegistry`].
///
/// Owned by the web layer and passed to handlers by reference; a session
/// gets its registry on first use. Dropping a session (idle timeout or
/// capacity) cancels whatever streams it still had pending.
pub struct SessionStore {
    sessions: Cache<String, Arc<ChannelRegistry>>,
    registry_config: RegistryConfig,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let sessions = Cache::builder()
            .max_capacity(config.max_sessions)
            .time_to_idle(config.idle_timeout)
            .eviction_listener(
                |session: Arc<String>, registry: Arc<ChannelRegistry>, cause: RemovalCause| {
                    if cause.was_evicted() {
                        debug!(session = %session, ?cause, "session dropped");
                        registry.close();
                    }
                },
            )
            .build();
        Self {
            sessions,
            registry_config: config.registry.clone(),
        }
    }

    /// The session's registry, created on first use.
    pub fn registry(&self, session_id: &str) -> Arc<ChannelRegistry> {
        self.sessions.get_with(session_id.to_owned(), || {
            Arc::new(ChannelRegistry::new(&self.registry_config))
        })
    }

    /// The session's registry, if it has one already.
    pub fn existing(&self, session_id: &str) -> Option<Arc<ChannelRegistry>> {
        self.sessions.get(session_id)
    }

    /// Forget a session, cancelling its pending streams.
    pub fn end_session(&self, session_id: &str) {
        if let Some(registry) = self.sessions.remove(session_id) {
            registry.close();
        }
    }

    /// Expire idle sessions and unredeemed streams now.
    ///
    /// Expiry otherwise happens lazily on access; running this periodically
    /// makes eviction (and the cancellation it triggers) timely.
    pub fn purge_expired(&self) {
        self.sessions.run_pending_tasks();
        for (_, registry) in self.sessions.iter() {
            registry.purge_expired();
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}
