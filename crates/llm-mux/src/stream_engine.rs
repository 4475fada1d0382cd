//! Generic streaming loop.
//!
//! One driver serves all four dialects. A provider supplies a
//! [`StreamDecoder`] that knows two things: how to turn a raw frame
//! into a text chunk (or a termination signal), and how to build the
//! final aggregated response once the stream ends. The driver owns
//! everything else — framing, accumulation, the chunk callback,
//! timeout, cancellation, and panic isolation.
//!
//! # Lifecycle
//!
//! The loop runs on its own spawned task. For every decoded event:
//! the first frame that yields a non-empty chunk is copied and kept
//! (provider frames may share a reused buffer upstream, so the copy is
//! load-bearing), the chunk is appended to the accumulator, and the
//! caller's callback fires. When the decoder reports termination or
//! the stream ends, `build_final(first_frame, accumulated)` is sent on
//! a capacity-1 channel — exactly once. On cancellation, timeout, a
//! read error, or a panicking callback the channel closes without a
//! value and no further callbacks run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::provider::{ChunkHandler, FinalReceiver};
use crate::sse::{FrameBuffer, Framing, SseEvent};

/// Default per-stream deadline.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// The decoder's verdict on one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStep {
    /// The stream is complete; stop reading.
    pub done: bool,
    /// Text extracted from this frame, if any.
    pub chunk: Option<String>,
}

impl StreamStep {
    /// A frame that carries nothing of interest.
    pub fn skip() -> Self {
        Self::default()
    }

    /// A frame that terminates the stream.
    pub fn done() -> Self {
        Self {
            done: true,
            chunk: None,
        }
    }

    /// A frame that contributed text.
    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            done: false,
            chunk: Some(text.into()),
        }
    }
}

/// Per-dialect stream decoding, driven by the generic loop.
pub trait StreamDecoder: Send + Sync + 'static {
    /// The wire framing this dialect uses.
    fn framing(&self) -> Framing {
        Framing::Sse
    }

    /// Inspects one frame: extract a text chunk and/or signal the end.
    fn on_event(&self, ev: &SseEvent) -> StreamStep;

    /// Builds the final aggregated response after the stream ends.
    ///
    /// `first_frame` is the copied payload of the first frame that
    /// produced text; `accumulated` is every chunk concatenated in
    /// arrival order.
    fn build_final(&self, first_frame: &[u8], accumulated: &str) -> Result<Value, LlmError>;
}

/// Knobs for one stream run.
pub struct StreamOptions {
    /// Deadline for the whole stream.
    pub timeout: Duration,
    /// Caller's per-chunk callback.
    pub on_chunk: Option<ChunkHandler>,
    /// Cancellation handle; firing it aborts the reader.
    pub cancel: CancellationToken,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STREAM_TIMEOUT,
            on_chunk: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Spawns the stream loop and returns the final-response channel.
///
/// The channel has capacity 1, receives at most one value, and closes
/// on every path — including cancellation, timeout, and errors, where
/// it closes empty.
pub fn drive<S, D>(bytes: S, decoder: D, opts: StreamOptions) -> FinalReceiver
where
    S: Stream<Item = Result<Bytes, LlmError>> + Send + 'static,
    D: StreamDecoder,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run(bytes, decoder, opts, tx));
    rx
}

async fn run<S, D>(bytes: S, decoder: D, opts: StreamOptions, tx: mpsc::Sender<Value>)
where
    S: Stream<Item = Result<Bytes, LlmError>> + Send + 'static,
    D: StreamDecoder,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut frames = FrameBuffer::new(decoder.framing());
    let mut first_frame: Option<Vec<u8>> = None;
    let mut accumulated = String::new();
    let deadline = tokio::time::sleep(opts.timeout);
    let mut deadline = std::pin::pin!(deadline);

    'read: loop {
        let next = tokio::select! {
            () = opts.cancel.cancelled() => {
                tracing::debug!("stream cancelled by caller");
                return;
            }
            () = &mut deadline => {
                tracing::warn!(timeout = ?opts.timeout, "stream processing timeout");
                return;
            }
            chunk = bytes.next() => chunk,
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "stream read error");
                return;
            }
        };
        let events = match frames.push(&chunk) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "stream framing error");
                return;
            }
        };

        for ev in events {
            match handle_event(&decoder, &ev, &mut first_frame, &mut accumulated, &opts) {
                EventOutcome::Continue => {}
                EventOutcome::Done => break 'read,
                EventOutcome::Abort => return,
            }
        }
    }

    let Some(first) = first_frame else {
        tracing::warn!("stream completed but no data received");
        return;
    };

    match decoder.build_final(&first, &accumulated) {
        Ok(final_json) => {
            // Capacity 1 and a single send: try_send cannot fail unless
            // the receiver is already gone, which we deliberately ignore.
            let _ = tx.try_send(final_json);
        }
        Err(e) => tracing::warn!(error = %e, "failed to build final stream response"),
    }
}

enum EventOutcome {
    /// Keep reading.
    Continue,
    /// The decoder signalled termination; build the final response.
    Done,
    /// The callback panicked; close the channel empty.
    Abort,
}

/// Processes one decoded event.
fn handle_event<D: StreamDecoder>(
    decoder: &D,
    ev: &SseEvent,
    first_frame: &mut Option<Vec<u8>>,
    accumulated: &mut String,
    opts: &StreamOptions,
) -> EventOutcome {
    let step = decoder.on_event(ev);
    if step.done {
        return EventOutcome::Done;
    }

    let Some(chunk) = step.chunk else {
        return EventOutcome::Continue;
    };
    if chunk.is_empty() {
        return EventOutcome::Continue;
    }

    if first_frame.is_none() {
        // Copy before caching: the event buffer does not outlive the loop.
        *first_frame = Some(ev.raw().to_vec());
    }
    accumulated.push_str(&chunk);

    if let Some(cb) = &opts.on_chunk {
        let outcome = catch_unwind(AssertUnwindSafe(|| cb(&chunk, ev.raw())));
        if outcome.is_err() {
            tracing::warn!("stream chunk callback panicked, aborting stream");
            return EventOutcome::Abort;
        }
    }
    EventOutcome::Continue
}
