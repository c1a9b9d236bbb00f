use std::fmt;
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::{Reply, Responder};
use crate::ensure;
use crate::protocol::body::feed::StreamFeed;
use crate::protocol::body::outbound::OutboundBody;
use crate::protocol::{BridgeError, PayloadSize, ResponseHead, StateError};

/// Receives errors raised while the transport pulls a streamed body.
pub type ErrorHook = Arc<dyn Fn(BridgeError) + Send + Sync>;

enum BridgeState {
    NotStarted,
    Buffering(Bytes),
    Streaming(StreamFeed),
    Finished,
}

impl fmt::Debug for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::NotStarted => f.write_str("NotStarted"),
            BridgeState::Buffering(chunk) => write!(f, "Buffering({} bytes)", chunk.len()),
            BridgeState::Streaming(_) => f.write_str("Streaming"),
            BridgeState::Finished => f.write_str("Finished"),
        }
    }
}

/// What a write did, so the owning message can update its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// kept in memory, nothing reached the transport yet
    Buffered,
    /// the head and a streaming body were handed to the transport
    Promoted,
    /// forwarded to the already streaming body
    Forwarded,
    /// dropped because the message must not carry a body
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// head and complete body were handed to the transport in one reply
    Replied,
    /// the streaming body was closed
    Closed,
}

/// Bridges a push-style response writer to a pull-style transport.
///
/// The first chunk is held back. If `finish` comes next, the head and that
/// chunk go out as a single [`Reply`] with a complete body. A second chunk
/// forces promotion instead: the head goes out with a [`DirectStream`] that
/// replays the held chunk, then every later one, in write order.
///
/// The head is built lazily through the `head` callback of [`write`],
/// [`writev`] and [`finish`], and only at the moment it is handed over.
///
/// [`DirectStream`]: crate::protocol::body::DirectStream
/// [`write`]: OutgoingBodyBridge::write
/// [`writev`]: OutgoingBodyBridge::writev
/// [`finish`]: OutgoingBodyBridge::finish
pub struct OutgoingBodyBridge {
    state: BridgeState,
    has_body: bool,
    responder: Option<Box<dyn Responder>>,
    error_hook: Option<ErrorHook>,
    signal: Option<CancellationToken>,
}

impl fmt::Debug for OutgoingBodyBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingBodyBridge")
            .field("state", &self.state)
            .field("has_body", &self.has_body)
            .field("replied", &self.responder.is_none())
            .finish_non_exhaustive()
    }
}

impl OutgoingBodyBridge {
    pub fn new(responder: Box<dyn Responder>) -> Self {
        Self { state: BridgeState::NotStarted, has_body: true, responder: Some(responder), error_hook: None, signal: None }
    }

    /// A streaming body is aborted as soon as `signal` is cancelled.
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    /// Marks whether the message may carry a body at all.
    pub fn set_has_body(&mut self, has_body: bool) {
        self.has_body = has_body;
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, BridgeState::Streaming(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, BridgeState::Finished)
    }

    pub fn write<H>(&mut self, chunk: Bytes, head: H) -> Result<WriteOutcome, BridgeError>
    where
        H: FnOnce(PayloadSize) -> Result<ResponseHead, BridgeError>,
    {
        self.writev(vec![chunk], head)
    }

    /// Writes several chunks in one call, preserving their order.
    ///
    /// # Errors
    ///
    /// [`StateError::WriteAfterFinish`] once the body is finished, or the
    /// error of `head` if promotion could not build the head. Either way the
    /// bridge is left unchanged.
    pub fn writev<H>(&mut self, chunks: Vec<Bytes>, head: H) -> Result<WriteOutcome, BridgeError>
    where
        H: FnOnce(PayloadSize) -> Result<ResponseHead, BridgeError>,
    {
        ensure!(!self.is_finished(), StateError::WriteAfterFinish);

        if !self.has_body {
            trace!(chunks = chunks.len(), "discard body written to a message without body");
            return Ok(WriteOutcome::Discarded);
        }

        if let BridgeState::Streaming(feed) = &self.state {
            for chunk in chunks {
                feed.push(chunk);
            }
            return Ok(WriteOutcome::Forwarded);
        }

        if chunks.is_empty() {
            return Ok(WriteOutcome::Buffered);
        }

        if matches!(self.state, BridgeState::NotStarted) && chunks.len() == 1 {
            if let Some(chunk) = chunks.into_iter().next() {
                self.state = BridgeState::Buffering(chunk);
            }
            return Ok(WriteOutcome::Buffered);
        }

        let head = head(PayloadSize::Chunked)?;

        let mut replay = Vec::with_capacity(chunks.len() + 1);
        if let BridgeState::Buffering(buffered) = mem::replace(&mut self.state, BridgeState::NotStarted) {
            replay.push(buffered);
        }
        replay.extend(chunks);

        debug!(chunks = replay.len(), "promote body to streaming");
        let (feed, mut stream) = StreamFeed::promote(replay);
        if let Some(signal) = &self.signal {
            feed.abort_on(signal.clone());
        }
        if let Some(hook) = &self.error_hook {
            let hook = Arc::clone(hook);
            stream = stream.on_error(move |e| hook(e));
        }

        self.state = BridgeState::Streaming(feed);
        self.reply(head, OutboundBody::Stream(stream));
        Ok(WriteOutcome::Promoted)
    }

    /// Ends the body.
    ///
    /// Without prior promotion this is the small-body fast path: the head and
    /// the buffered chunk, if any, are handed over in one reply and the
    /// transport never has to pull.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyFinished`] on a second call, or the error of
    /// `head`. Neither changes the bridge.
    pub fn finish<H>(&mut self, head: H) -> Result<FinishOutcome, BridgeError>
    where
        H: FnOnce(PayloadSize) -> Result<ResponseHead, BridgeError>,
    {
        ensure!(!self.is_finished(), StateError::AlreadyFinished);

        if let BridgeState::Streaming(feed) = &self.state {
            feed.close();
            self.state = BridgeState::Finished;
            return Ok(FinishOutcome::Closed);
        }

        let body = match &self.state {
            BridgeState::Buffering(chunk) if self.has_body => OutboundBody::full(chunk.clone()),
            _ => OutboundBody::Empty,
        };
        let head = head(body.payload_size())?;

        self.state = BridgeState::Finished;
        self.reply(head, body);
        Ok(FinishOutcome::Replied)
    }

    /// Tears down the bridge. A streaming body is aborted, a reply that was
    /// never sent is dropped.
    pub fn destroy(&mut self) {
        if let BridgeState::Streaming(feed) = &self.state {
            feed.abort();
        }
        self.state = BridgeState::Finished;
        if self.responder.take().is_some() {
            debug!("drop responder of a destroyed message without reply");
        }
    }

    fn reply(&mut self, head: ResponseHead, body: OutboundBody) {
        match self.responder.take() {
            Some(mut responder) => responder.reply(Reply { head, body }),
            None => warn!("reply already handed to the transport"),
        }
    }
}

impl Drop for OutgoingBodyBridge {
    fn drop(&mut self) {
        if let BridgeState::Streaming(feed) = &self.state {
            debug!("abort streaming body of a dropped message");
            feed.abort();
        }
    }
}
