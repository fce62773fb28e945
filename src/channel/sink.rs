//! Reader-side destinations for a draining [`ResponseChannel`](super::ResponseChannel).

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::Outcome;

/// The sink can accept no more chunks (e.g. the client connection closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("chunk sink closed")]
pub struct SinkClosed;

/// Destination for the chunks of a draining channel.
///
/// A failed write ends the drain; it is treated as the reader going away,
/// never as an error of the channel itself.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Deliver one chunk, in emission order.
    async fn send_chunk(&mut self, chunk: &str) -> Result<(), SinkClosed>;

    /// Called once after the last chunk when the channel terminates.
    async fn finish(&mut self, _outcome: &Outcome) -> Result<(), SinkClosed> {
        Ok(())
    }

    /// Resolves when the sink stopped accepting chunks.
    ///
    /// Lets an idle drain notice a vanished reader without waiting for the
    /// next chunk. Sinks that cannot observe closure never resolve.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

#[async_trait]
impl ChunkSink for String {
    async fn send_chunk(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.push_str(chunk);
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for Vec<String> {
    async fn send_chunk(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.push(chunk.to_owned());
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for mpsc::Sender<String> {
    async fn send_chunk(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.send(chunk.to_owned()).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        mpsc::Sender::closed(self).await
    }
}
