//! Streaming hand-off between a generation task and a later reader.
//!
//! A [`ResponseChannel`] is written by exactly one producer (the task that
//! pumps backend tokens into it) and drained by exactly one reader (the
//! request that attached to the stream). Reader and writer run on
//! independent tasks and usually start at different times, so the channel
//! retains every chunk until it is dropped: a reader that attaches late
//! replays the history from the start and then continues live.
//!
//! # Lifecycle
//!
//! ```text
//!  writer: append* ──► complete | fail          (or cancel from anywhere)
//!                         │
//!                         ▼
//!  reader: drain ──► chunks in order ──► finish(outcome)
//!                         │
//!                         ▼
//!  completion(): resolves once with the Outcome
//! ```
//!
//! The completion notification is published after a live reader received
//! every chunk; with no reader attached it is published at termination.
//!
//! # Buffer cap
//!
//! Retained chunk text is capped at [`ChannelConfig::max_buffered_bytes`]
//! (default [`DEFAULT_MAX_BUFFERED_BYTES`]). The append that would exceed it
//! fails with [`SkaldError::BufferOverflow`], the channel terminates with a
//! failure and the writer's cancellation token fires.

mod sink;

pub use sink::{ChunkSink, SinkClosed};

use std::future::Future;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::telemetry;
use crate::types::FinishReason;
use crate::{Result, SkaldError};

/// Default cap on retained chunk text per channel: 1 MiB.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Configuration for a [`ResponseChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum bytes of chunk text a channel retains. Default: 1 MiB.
    pub max_buffered_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retained-bytes cap.
    pub fn max_buffered_bytes(mut self, bytes: usize) -> Self {
        self.max_buffered_bytes = bytes;
        self
    }
}

/// How a channel terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The writer finished; `whole` is the concatenation of all chunks.
    Completed {
        whole: String,
        finish_reason: FinishReason,
    },
    /// The writer reported an error.
    Failed(String),
    /// Nobody will read the output; the writer was told to stop.
    Cancelled,
}

impl Outcome {
    /// The whole response, if the channel completed successfully.
    pub fn whole_response(&self) -> Option<&str> {
        match self {
            Outcome::Completed { whole, .. } => Some(whole),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// Result of a [`ResponseChannel::drain`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drained {
    /// Every chunk was delivered and the channel terminated.
    Finished(Outcome),
    /// The sink stopped accepting chunks after `delivered` of them.
    ReaderGone { delivered: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Idle,
    Draining,
    Done,
}

struct State {
    chunks: Vec<String>,
    buffered_bytes: usize,
    outcome: Option<Outcome>,
    reader: ReaderState,
}

struct Shared {
    id: OnceLock<String>,
    config: ChannelConfig,
    state: Mutex<State>,
    changed: Notify,
    cancel: CancellationToken,
    completion: watch::Sender<Option<Outcome>>,
}

/// Single-writer / single-reader buffered stream of text chunks.
///
/// Cheap to clone; all clones refer to the same channel. Internally
/// synchronized, so the writer may append while a drain is in progress.
#[derive(Clone)]
pub struct ResponseChannel {
    shared: Arc<Shared>,
}

impl ResponseChannel {
    /// Create a channel with the default buffer cap.
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                id: OnceLock::new(),
                config,
                state: Mutex::new(State {
                    chunks: Vec::new(),
                    buffered_bytes: 0,
                    outcome: None,
                    reader: ReaderState::Idle,
                }),
                changed: Notify::new(),
                cancel: CancellationToken::new(),
                completion,
            }),
        }
    }

    /// Stream identifier, once the channel was registered.
    pub fn id(&self) -> Option<&str> {
        self.shared.id.get().map(String::as_str)
    }

    /// Assign the stream identifier. Returns `false` if one was already set.
    pub(crate) fn assign_id(&self, id: &str) -> bool {
        self.shared.id.set(id.to_owned()).is_ok()
    }

    // ========================================================================
    // Writer side
    // ========================================================================

    /// Append a chunk and wake the reader.
    ///
    /// Empty chunks are ignored.
    pub fn append(&self, chunk: impl Into<String>) -> Result<()> {
        let chunk = chunk.into();
        let limit = self.shared.config.max_buffered_bytes;
        {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return Err(SkaldError::AlreadyTerminal);
            }
            if chunk.is_empty() {
                return Ok(());
            }
            if state.buffered_bytes + chunk.len() <= limit {
                state.buffered_bytes += chunk.len();
                state.chunks.push(chunk);
                drop(state);
                self.shared.changed.notify_waiters();
                return Ok(());
            }
        }

        // Over the cap: terminate and stop the writer.
        let _ = self.terminate(Outcome::Failed(
            SkaldError::BufferOverflow { limit }.to_string(),
        ));
        self.shared.cancel.cancel();
        Err(SkaldError::BufferOverflow { limit })
    }

    /// Mark the channel completed; the whole response is the concatenation
    /// of all appended chunks.
    pub fn complete(&self, finish_reason: FinishReason) -> Result<()> {
        let whole = {
            let state = self.shared.state.lock();
            if state.outcome.is_some() {
                return Err(SkaldError::AlreadyTerminal);
            }
            state.chunks.concat()
        };
        self.terminate(Outcome::Completed {
            whole,
            finish_reason,
        })
    }

    /// Like [`complete`](Self::complete), but checks a writer-supplied whole
    /// response against the streamed chunks first.
    ///
    /// On mismatch the channel stays open and [`SkaldError::ResponseMismatch`]
    /// is returned.
    pub fn complete_with(&self, whole: &str, finish_reason: FinishReason) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if state.outcome.is_some() {
                return Err(SkaldError::AlreadyTerminal);
            }
            let mut offset = 0;
            for chunk in &state.chunks {
                if !whole[offset..].starts_with(chunk.as_str()) {
                    return Err(SkaldError::ResponseMismatch);
                }
                offset += chunk.len();
            }
            if offset != whole.len() {
                return Err(SkaldError::ResponseMismatch);
            }
        }
        self.terminate(Outcome::Completed {
            whole: whole.to_owned(),
            finish_reason,
        })
    }

    /// Terminate with an error; a reader sees it after the buffered chunks.
    pub fn fail(&self, message: impl Into<String>) -> Result<()> {
        self.terminate(Outcome::Failed(message.into()))
    }

    /// Tell the writer nobody will read its output.
    ///
    /// Terminates the channel as [`Outcome::Cancelled`] unless it already
    /// terminated, and fires the cancellation token either way. Returns
    /// whether this call terminated the channel.
    pub fn cancel(&self) -> bool {
        let terminated = self.terminate(Outcome::Cancelled).is_ok();
        self.shared.cancel.cancel();
        if terminated {
            metrics::counter!(telemetry::CHANNELS_CANCELLED_TOTAL).increment(1);
            debug!(stream_id = self.id().unwrap_or("-"), "response channel cancelled");
        }
        terminated
    }

    /// Whether the writer has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves once the writer has been asked to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.shared.cancel.cancelled()
    }

    /// A handle on the writer's cancellation signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn is_terminal(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// The terminal outcome, if the channel terminated.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.state.lock().outcome.clone()
    }

    /// The whole response, once the channel completed successfully.
    pub fn whole_response(&self) -> Option<String> {
        self.outcome()
            .and_then(|o| o.whole_response().map(str::to_owned))
    }

    /// Number of chunks appended so far.
    pub fn chunk_count(&self) -> usize {
        self.shared.state.lock().chunks.len()
    }

    // ========================================================================
    // Completion notification
    // ========================================================================

    /// One-shot notification of the terminal outcome.
    ///
    /// Resolves immediately when called after termination. If every handle
    /// on the channel is dropped before it terminates, resolves to
    /// [`Outcome::Cancelled`].
    pub fn completion(&self) -> impl Future<Output = Outcome> + Send + 'static {
        let mut rx = self.shared.completion.subscribe();
        async move {
            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(outcome) => (*outcome).clone(),
                Err(_) => None,
            };
            outcome.unwrap_or(Outcome::Cancelled)
        }
    }

    /// Run `listener` exactly once with the terminal outcome.
    ///
    /// Spawns onto the current tokio runtime.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let completion = self.completion();
        tokio::spawn(async move { listener(completion.await) });
    }

    // ========================================================================
    // Reader side
    // ========================================================================

    /// Write every chunk, in order, to `sink` until the channel terminates
    /// or the sink closes.
    ///
    /// Replays chunks produced before the call, then follows live output.
    /// Only one drain per channel is allowed; a second call fails with
    /// [`SkaldError::AlreadyDraining`]. A closed sink cancels a writer that
    /// is still producing, and so does dropping the returned future before
    /// it resolves.
    pub async fn drain<S>(&self, sink: &mut S) -> Result<Drained>
    where
        S: ChunkSink + ?Sized,
    {
        {
            let mut state = self.shared.state.lock();
            if state.reader != ReaderState::Idle {
                return Err(SkaldError::AlreadyDraining);
            }
            state.reader = ReaderState::Draining;
        }

        // Ends the reader side if this future is dropped mid-drain.
        let mut guard = DrainGuard {
            channel: self,
            delivered: 0,
        };
        loop {
            // Register interest before looking at the state so an append
            // racing with this iteration still wakes us.
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (pending, outcome) = {
                let state = self.shared.state.lock();
                (state.chunks[guard.delivered..].to_vec(), state.outcome.clone())
            };

            for chunk in &pending {
                if sink.send_chunk(chunk).await.is_err() {
                    return Ok(self.reader_gone(guard.delivered));
                }
                guard.delivered += 1;
            }

            // No chunk can follow a terminal outcome, so `pending` held the rest.
            if let Some(outcome) = outcome {
                let _ = sink.finish(&outcome).await;
                self.shared.state.lock().reader = ReaderState::Done;
                self.publish(outcome.clone());
                return Ok(Drained::Finished(outcome));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sink.closed() => return Ok(self.reader_gone(guard.delivered)),
            }
        }
    }

    fn reader_gone(&self, delivered: usize) -> Drained {
        let outcome = {
            let mut state = self.shared.state.lock();
            state.reader = ReaderState::Done;
            state.outcome.clone()
        };
        debug!(
            stream_id = self.id().unwrap_or("-"),
            delivered, "reader left before the stream ended"
        );
        match outcome {
            Some(outcome) => self.publish(outcome),
            None => {
                self.cancel();
            }
        }
        Drained::ReaderGone { delivered }
    }

    fn terminate(&self, outcome: Outcome) -> Result<()> {
        let publish_now = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return Err(SkaldError::AlreadyTerminal);
            }
            state.outcome = Some(outcome.clone());
            state.reader != ReaderState::Draining
        };
        self.shared.changed.notify_waiters();
        if publish_now {
            self.publish(outcome);
        }
        Ok(())
    }

    fn publish(&self, outcome: Outcome) {
        self.shared.completion.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}

/// Runs the reader-gone path when a drain is dropped before it returns.
struct DrainGuard<'a> {
    channel: &'a ResponseChannel,
    delivered: usize,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let abandoned = self.channel.shared.state.lock().reader == ReaderState::Draining;
        if abandoned {
            self.channel.reader_gone(self.delivered);
        }
    }
}

impl Default for ResponseChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ResponseChannel")
            .field("id", &self.id())
            .field("chunks", &state.chunks.len())
            .field("outcome", &state.outcome)
            .finish()
    }
}
