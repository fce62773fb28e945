//! Pumps a backend token stream into a [`ResponseChannel`].

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span};

use crate::channel::ResponseChannel;
use crate::providers::GenerateProvider;
use crate::types::{FinishReason, GenerateEvent, GenerateOptions};

/// Run a streaming generation on its own task, writing into `channel`.
///
/// `Text` events become chunks; `Done` or the end of the stream completes
/// the channel and a backend error fails it. When the channel's
/// cancellation token fires (evicted before anyone fetched it, or the
/// reader left) the backend stream is dropped mid-flight.
///
/// The returned handle belongs to a supervisor: if the pump panics, the
/// supervisor fails the channel so a waiting reader is released.
pub fn spawn_generation(
    provider: Arc<dyn GenerateProvider>,
    prompt: String,
    options: GenerateOptions,
    channel: ResponseChannel,
) -> JoinHandle<()> {
    let span = info_span!(
        "generation",
        stream_id = channel.id().unwrap_or("-"),
        provider = provider.name(),
        model = %options.model,
    );
    let pump = tokio::spawn(pump(provider, prompt, options, channel.clone()).instrument(span));

    tokio::spawn(async move {
        if let Err(e) = pump.await
            && e.is_panic()
        {
            error!(stream_id = channel.id().unwrap_or("-"), "generation task panicked");
            let _ = channel.fail("generation task panicked");
        }
    })
}

async fn pump(
    provider: Arc<dyn GenerateProvider>,
    prompt: String,
    options: GenerateOptions,
    channel: ResponseChannel,
) {
    let token = channel.cancellation_token();

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("cancelled before the backend stream opened");
            return;
        }
        opened = provider.generate_stream(&prompt, &options) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "backend stream failed to open");
            let _ = channel.fail(e.to_string());
            return;
        }
    };

    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("generation cancelled");
                return;
            }
            event = stream.next() => event,
        };
        match event {
            Some(Ok(GenerateEvent::Text(text))) => {
                if let Err(e) = channel.append(text) {
                    debug!(error = %e, "channel stopped accepting chunks");
                    return;
                }
            }
            Some(Ok(GenerateEvent::Done(finish_reason))) => {
                let _ = channel.complete(finish_reason);
                return;
            }
            Some(Err(e)) => {
                error!(error = %e, "backend stream failed");
                let _ = channel.fail(e.to_string());
                return;
            }
            None => {
                let _ = channel.complete(FinishReason::Stop);
                return;
            }
        }
    }
}
