//! Telemetry metric name constants.
//!
//! Centralised metric names for skald operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `skald_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name (e.g. "openrouter", "ollama")
//! - `operation`: operation invoked (e.g. "translate", "generate_stream")
//! - `status`: outcome: "ok" or "error"
//! - `cause`: eviction cause: "expired", "size"

/// Total backend requests dispatched through the provider chain.
///
/// Labels: `provider`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "skald_requests_total";

/// Backend request duration in seconds.
///
/// Labels: `provider`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "skald_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`, `operation`.
pub const RETRIES_TOTAL: &str = "skald_retries_total";

/// Total result cache hits.
pub const CACHE_HITS_TOTAL: &str = "skald_cache_hits_total";

/// Total result cache misses.
pub const CACHE_MISSES_TOTAL: &str = "skald_cache_misses_total";

/// Result cache entries removed by the eviction policy.
///
/// Labels: `cause`.
pub const CACHE_EVICTIONS_TOTAL: &str = "skald_cache_evictions_total";

/// Response channels registered for a later fetch.
pub const CHANNELS_REGISTERED_TOTAL: &str = "skald_channels_registered_total";

/// Response channels evicted from a registry before anyone fetched them.
///
/// Labels: `cause`.
pub const CHANNELS_EVICTED_TOTAL: &str = "skald_channels_evicted_total";

/// Generations stopped because nobody will read their output.
pub const CHANNELS_CANCELLED_TOTAL: &str = "skald_channels_cancelled_total";
