//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;

use skald::providers::{GenerateProvider, GenerateStream};
use skald::{
    ChunkSink, FinishReason, GenerateEvent, GenerateOptions, GenerateResponse, Outcome, Result,
    SinkClosed, SkaldError,
};

/// Provider that replies with a fixed list of chunks.
///
/// Counts calls and records every prompt with its options.
pub struct ScriptedProvider {
    chunks: Vec<String>,
    delay: Duration,
    fail_with: Option<fn() -> SkaldError>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, GenerateOptions)>>,
}

impl ScriptedProvider {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            delay: Duration::ZERO,
            fail_with: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose every call fails with `fail_with()`.
    pub fn failing(fail_with: fn() -> SkaldError) -> Self {
        Self {
            fail_with: Some(fail_with),
            ..Self::new(&[])
        }
    }

    /// Pause before each streamed event.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(String, GenerateOptions)> {
        self.requests.lock().last().cloned()
    }

    fn record(&self, prompt: &str, options: &GenerateOptions) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .push((prompt.to_owned(), options.clone()));
        match self.fail_with {
            Some(fail_with) => Err(fail_with()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GenerateProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResponse> {
        self.record(prompt, options)?;
        Ok(GenerateResponse {
            text: self.chunks.concat(),
            model: Some(options.model.clone()),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateStream> {
        self.record(prompt, options)?;
        let delay = self.delay;
        let events: Vec<GenerateEvent> = self
            .chunks
            .iter()
            .cloned()
            .map(GenerateEvent::Text)
            .chain(std::iter::once(GenerateEvent::Done(FinishReason::Stop)))
            .collect();
        let stream = futures_util::stream::iter(events).then(move |event| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, SkaldError>(event)
        });
        Ok(Box::pin(stream))
    }
}

/// Sink that records chunks and the terminal outcome.
#[derive(Default)]
pub struct RecordingSink {
    pub chunks: Vec<String>,
    pub finished: Option<Outcome>,
}

#[async_trait]
impl ChunkSink for RecordingSink {
    async fn send_chunk(&mut self, chunk: &str) -> std::result::Result<(), SinkClosed> {
        self.chunks.push(chunk.to_owned());
        Ok(())
    }

    async fn finish(&mut self, outcome: &Outcome) -> std::result::Result<(), SinkClosed> {
        self.finished = Some(outcome.clone());
        Ok(())
    }
}

pub fn server_error() -> SkaldError {
    SkaldError::Api {
        status: 500,
        message: "upstream exploded".into(),
    }
}
