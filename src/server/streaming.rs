//! SSE (Server-Sent Events) relay for provider fragments.
//!
//! Pulls fragments from a [`ProviderClient`] one at a time and turns each into
//! a `data:` event. The stream always ends with `data: [DONE]`; a provider
//! failure (or an idle provider) is signalled with `data: [ERROR]` first.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::provider::{FragmentStream, ProviderClient, ProviderError};
use crate::telemetry::{RunOutcome, RunTracker};

/// Terminal sentinel written after the last fragment.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Marker written when the provider stream fails.
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// One outgoing SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Fragment(String),
    Error,
    Done,
}

impl Frame {
    /// Text carried in the frame's `data` field.
    pub fn payload(&self) -> &str {
        match self {
            Frame::Fragment(text) => text,
            Frame::Error => ERROR_SENTINEL,
            Frame::Done => DONE_SENTINEL,
        }
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.payload())
    }
}

/// Where the relay is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No fragment received yet.
    Idle,
    /// At least one fragment forwarded.
    Streaming,
    /// Terminal.
    Done(Termination),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Failed,
}

/// Per-request relay between a provider stream and an SSE response.
pub struct StreamRelay {
    request_id: String,
    provider: Arc<dyn ProviderClient>,
    model: String,
    prompt: String,
    fragments: Option<FragmentStream>,
    tracker: RunTracker,
    idle_timeout: Duration,
    state: RelayState,
    pending: VecDeque<Frame>,
}

impl StreamRelay {
    pub fn new(
        request_id: impl Into<String>,
        provider: Arc<dyn ProviderClient>,
        model: impl Into<String>,
        prompt: impl Into<String>,
        tracker: RunTracker,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            provider,
            model: model.into(),
            prompt: prompt.into(),
            fragments: None,
            tracker,
            idle_timeout,
            state: RelayState::Idle,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Produce the next frame, or `None` once the terminal frame has been sent.
    ///
    /// The provider call is opened lazily on the first poll, so failures
    /// before the first byte still travel inside the SSE stream.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(frame);
        }
        if matches!(self.state, RelayState::Done(_)) {
            return None;
        }

        if self.fragments.is_none() {
            let opened = timeout(
                self.idle_timeout,
                self.provider.stream(&self.model, &self.prompt),
            )
            .await;
            match opened {
                Ok(Ok(fragments)) => self.fragments = Some(fragments),
                Ok(Err(e)) => return Some(self.fail(e)),
                Err(_) => return Some(self.fail(ProviderError::IdleTimeout(self.idle_timeout))),
            }
        }

        loop {
            let fragments = self.fragments.as_mut()?;
            match timeout(self.idle_timeout, fragments.next()).await {
                Ok(Some(Ok(chunk))) => {
                    self.tracker.record(&chunk);
                    if let Some(reason) = &chunk.finish_reason {
                        debug!(request_id = %self.request_id, finish_reason = %reason, "Provider finished");
                    }
                    // Metadata-only chunks carry no text for the client.
                    if chunk.text.is_empty() {
                        continue;
                    }
                    self.state = RelayState::Streaming;
                    return Some(Frame::Fragment(normalize_newlines(&chunk.text)));
                }
                Ok(Some(Err(e))) => return Some(self.fail(e)),
                Ok(None) => return Some(self.complete()),
                Err(_) => return Some(self.fail(ProviderError::IdleTimeout(self.idle_timeout))),
            }
        }
    }

    fn complete(&mut self) -> Frame {
        self.state = RelayState::Done(Termination::Completed);
        self.fragments = None;

        let run = self.tracker.run();
        info!(
            request_id = %self.request_id,
            run_id = %run.id,
            fragments = run.fragments,
            output_tokens = run.usage.map(|u| u.output_tokens),
            "Stream completed"
        );
        self.tracker.finish(RunOutcome::Completed);
        Frame::Done
    }

    fn fail(&mut self, err: ProviderError) -> Frame {
        error!(
            request_id = %self.request_id,
            run_id = %self.tracker.run().id,
            fragments_sent = matches!(self.state, RelayState::Streaming),
            "Provider stream failed: {err}"
        );
        self.state = RelayState::Done(Termination::Failed);
        // Dropping the provider stream closes the upstream connection.
        self.fragments = None;
        self.tracker.finish(RunOutcome::Failed(err.to_string()));
        self.pending.push_back(Frame::Done);
        Frame::Error
    }

    /// Consume the relay as a stream of frames.
    pub fn into_frames(self) -> impl Stream<Item = Frame> + Send {
        stream::unfold(self, |mut relay| async move {
            let frame = relay.next_frame().await?;
            Some((frame, relay))
        })
    }

    /// Consume the relay as an SSE event stream for axum.
    pub fn into_sse_stream(self) -> impl Stream<Item = Result<Event, Infallible>> + Send {
        self.into_frames().map(|frame| Ok(frame.into_event()))
    }
}

impl Drop for StreamRelay {
    fn drop(&mut self) {
        if !matches!(self.state, RelayState::Done(_)) {
            info!(request_id = %self.request_id, "Client went away before stream end");
        }
    }
}

/// SSE field values cannot hold bare carriage returns; fold them into `\n`
/// so multi-line text becomes multi-line `data:` fields.
fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}
