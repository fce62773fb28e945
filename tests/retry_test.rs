use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use skald::providers::{
    GenerateProvider, GenerateStream, ProviderChain, RetryConfig, RetryingGenerateProvider,
};
use skald::telemetry;
use skald::{FinishReason, GenerateEvent, GenerateOptions, GenerateResponse, Result, SkaldError};

/// Mock provider that fails N times then succeeds.
struct FailThenSucceed {
    fail_count: AtomicU32,
    fail_with: fn() -> SkaldError,
    total_calls: AtomicU32,
}

impl FailThenSucceed {
    fn new(failures: u32, fail_with: fn() -> SkaldError) -> Self {
        Self {
            fail_count: AtomicU32::new(failures),
            fail_with,
            total_calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn attempt(&self) -> Result<()> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::Relaxed);
            return Err((self.fail_with)());
        }
        Ok(())
    }
}

#[async_trait]
impl GenerateProvider for FailThenSucceed {
    fn name(&self) -> &str {
        "mock-retry"
    }

    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<GenerateResponse> {
        self.attempt()?;
        Ok(GenerateResponse {
            text: "ok".into(),
            model: Some("test".into()),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<GenerateStream> {
        self.attempt()?;
        let events = [
            Ok(GenerateEvent::Text("ok".into())),
            Ok(GenerateEvent::Done(FinishReason::Stop)),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
}

fn options() -> GenerateOptions {
    GenerateOptions::new("test")
}

// ============================================================================
// RetryConfig
// ============================================================================

#[test]
fn retry_config_defaults() {
    let config = RetryConfig::default();
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.initial_delay, Duration::from_millis(500));
    assert_eq!(config.max_delay, Duration::from_secs(30));
    assert!(config.jitter);
}

#[test]
fn disabled_config_makes_a_single_attempt() {
    assert_eq!(RetryConfig::disabled().max_attempts, 1);
}

// ============================================================================
// RetryingGenerateProvider
// ============================================================================

#[tokio::test]
async fn retries_on_transient_error_then_succeeds() {
    let inner = Arc::new(FailThenSucceed::new(2, || SkaldError::RateLimited {
        retry_after: None,
    }));
    let provider = RetryingGenerateProvider::new(inner.clone(), fast_retry(3));

    let result = provider.generate("hi", &options()).await;

    assert!(result.is_ok());
    assert_eq!(inner.call_count(), 3); // 2 failures + 1 success
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let inner = Arc::new(FailThenSucceed::new(10, || {
        SkaldError::Http("timeout".into())
    }));
    let provider = RetryingGenerateProvider::new(inner.clone(), fast_retry(3));

    let result = provider.generate("hi", &options()).await;

    assert!(matches!(result, Err(SkaldError::Http(_))));
    assert_eq!(inner.call_count(), 3);
}

#[tokio::test]
async fn does_not_retry_permanent_errors() {
    let inner = Arc::new(FailThenSucceed::new(1, || SkaldError::AuthenticationFailed));
    let provider = RetryingGenerateProvider::new(inner.clone(), fast_retry(5));

    let result = provider.generate("hi", &options()).await;

    assert!(matches!(result, Err(SkaldError::AuthenticationFailed)));
    assert_eq!(inner.call_count(), 1); // no retry
}

#[tokio::test(start_paused = true)]
async fn respects_retry_after_duration() {
    let inner = Arc::new(FailThenSucceed::new(1, || SkaldError::RateLimited {
        retry_after: Some(Duration::from_millis(50)),
    }));
    let provider = RetryingGenerateProvider::new(inner.clone(), fast_retry(2));

    let start = tokio::time::Instant::now();
    let result = provider.generate("hi", &options()).await;
    let elapsed = start.elapsed();

    assert!(result.is_ok());
    // Waited for the hint (50ms), not the initial delay (1ms).
    assert!(elapsed >= Duration::from_millis(50));
}

#[tokio::test]
async fn disabled_config_no_retry() {
    let inner = Arc::new(FailThenSucceed::new(1, || SkaldError::RateLimited {
        retry_after: None,
    }));
    let provider = RetryingGenerateProvider::new(inner.clone(), RetryConfig::disabled());

    let result = provider.generate("hi", &options()).await;

    assert!(result.is_err());
    assert_eq!(inner.call_count(), 1);
}

#[tokio::test]
async fn opening_a_stream_is_retried() {
    let inner = Arc::new(FailThenSucceed::new(1, || SkaldError::Api {
        status: 503,
        message: "overloaded".into(),
    }));
    let provider = RetryingGenerateProvider::new(inner.clone(), fast_retry(3));

    assert!(provider.generate_stream("hi", &options()).await.is_ok());
    assert_eq!(inner.call_count(), 2);
}

#[test]
fn retry_decorator_keeps_the_inner_name() {
    let inner = Arc::new(FailThenSucceed::new(0, || SkaldError::EmptyResponse));
    let provider = RetryingGenerateProvider::new(inner, RetryConfig::default());
    assert_eq!(provider.name(), "mock-retry");
}

// ============================================================================
// ProviderChain
// ============================================================================

#[tokio::test]
async fn chain_falls_back_after_transient_failures() {
    let flaky = Arc::new(FailThenSucceed::new(10, || SkaldError::Http("reset".into())));
    let healthy = Arc::new(FailThenSucceed::new(0, || SkaldError::EmptyResponse));

    let mut chain = ProviderChain::new().with_retry(fast_retry(2));
    chain.push(flaky.clone());
    chain.push(healthy.clone());

    let response = chain.generate("hi", &options()).await.unwrap();
    assert_eq!(response.text, "ok");
    assert_eq!(flaky.call_count(), 2);
    assert_eq!(healthy.call_count(), 1);
}

#[tokio::test]
async fn chain_stops_at_a_permanent_error() {
    let broken = Arc::new(FailThenSucceed::new(10, || SkaldError::AuthenticationFailed));
    let healthy = Arc::new(FailThenSucceed::new(0, || SkaldError::EmptyResponse));

    let mut chain = ProviderChain::new();
    chain.push(broken.clone());
    chain.push(healthy.clone());

    assert!(matches!(
        chain.generate_stream("hi", &options()).await,
        Err(SkaldError::AuthenticationFailed)
    ));
    assert_eq!(healthy.call_count(), 0);
}

// ============================================================================
// Metrics
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn chain_records_requests_and_retries() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let mut chain = ProviderChain::new().with_retry(fast_retry(3));
                chain.push(Arc::new(FailThenSucceed::new(1, || {
                    SkaldError::Http("reset".into())
                })));
                chain.generate("hi", &options()).await
            })
        })
    });
    assert!(result.is_ok());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 1);
    assert!(has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS));
}
