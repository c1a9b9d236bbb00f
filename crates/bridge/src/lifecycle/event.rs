use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use tracing::trace;

use crate::connection::ListenAddress;
use crate::message::IncomingMessage;
use crate::protocol::BridgeError;
use crate::server::ServerResponse;

/// Lifecycle events of a single message.
#[derive(Debug)]
pub enum MessageEvent {
    /// client: the response head arrived
    Response(IncomingMessage),
    /// client: the server switched protocols
    Upgrade(IncomingMessage),
    /// client: the request was bound to a connection
    Socket,
    /// client: `expect: 100-continue` was requested
    Continue,
    Timeout,
    /// client: the request was aborted by its owner
    Abort,
    /// incoming: the message was destroyed before it was complete
    Aborted,
    Close,
    Error(BridgeError),
}

impl MessageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MessageEvent::Response(_) => "response",
            MessageEvent::Upgrade(_) => "upgrade",
            MessageEvent::Socket => "socket",
            MessageEvent::Continue => "continue",
            MessageEvent::Timeout => "timeout",
            MessageEvent::Abort => "abort",
            MessageEvent::Aborted => "aborted",
            MessageEvent::Close => "close",
            MessageEvent::Error(_) => "error",
        }
    }
}

/// Events of a server.
#[derive(Debug)]
pub enum ServerEvent {
    Listening(ListenAddress),
    Request(IncomingMessage, ServerResponse),
    Close,
    Error(BridgeError),
}

/// Creates a connected event sink and receiver.
pub fn events<E>() -> (EventSink<E>, Events<E>) {
    let (tx, rx) = mpsc::unbounded();
    (EventSink { tx }, Events { rx })
}

/// Emitting side of an event channel. Emission never blocks and never fails:
/// events nobody listens to any more are dropped.
pub struct EventSink<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E> fmt::Debug for EventSink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("closed", &self.tx.is_closed()).finish()
    }
}

impl<E> EventSink<E> {
    pub fn emit(&self, event: E) {
        if let Err(e) = self.tx.unbounded_send(event) {
            trace!(disconnected = e.is_disconnected(), "drop event, receiver is gone");
        }
    }
}

/// Receiving side of an event channel.
pub struct Events<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> fmt::Debug for Events<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events").finish_non_exhaustive()
    }
}

impl<E> Events<E> {
    /// Waits for the next event. Returns `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.next().await
    }

    /// Returns an already emitted event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_next().ok().flatten()
    }

    /// Drains every event emitted so far.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl<E> Stream for Events<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}
