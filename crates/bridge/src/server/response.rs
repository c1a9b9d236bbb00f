use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Method, StatusCode};
use tracing::{debug, trace};

use crate::connection::Responder;
use crate::lifecycle::{AbortCoordinator, Events, MessageEvent};
use crate::message::{IncomingHandle, MessageCore, OutgoingMessage};
use crate::protocol::body::{FinishOutcome, OutgoingBodyBridge, WriteOutcome};
use crate::protocol::header::HeaderInit;
use crate::protocol::{BridgeError, PayloadSize, ProtocolError, ResponseHead, build_head};

/// Reason phrase used for status codes without a canonical one.
pub const UNKNOWN_REASON: &str = "unknown";

/// Validates a numeric status code, accepting `100..=999`.
pub fn parse_status(status: u16) -> Result<StatusCode, ProtocolError> {
    StatusCode::from_u16(status).map_err(|_e| ProtocolError::InvalidStatus { status })
}

fn status_allows_body(request_method: &Method, status: StatusCode) -> bool {
    !(request_method == Method::HEAD || status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

/// The response to one inbound request.
///
/// Headers may be changed until the head is handed to the transport, which
/// happens on the second write (streaming) or on `finish` (complete body in a
/// single reply). Finishing the response completes and closes its request.
pub struct ServerResponse {
    core: MessageCore,
    status: StatusCode,
    reason: Option<String>,
    request_method: Method,
    bridge: OutgoingBodyBridge,
    request: IncomingHandle,
    events: Option<Events<MessageEvent>>,
}

impl fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerResponse")
            .field("status", &self.status)
            .field("phase", &self.core.lifecycle.phase())
            .field("headers_sent", &self.core.lifecycle.headers_sent())
            .field("finished", &self.core.lifecycle.is_finished())
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl OutgoingMessage for ServerResponse {
    fn core(&self) -> &MessageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut MessageCore {
        &mut self.core
    }
}

impl ServerResponse {
    pub(crate) fn new(request_method: Method, request: IncomingHandle, responder: Box<dyn Responder>, abort: AbortCoordinator, events: Events<MessageEvent>) -> Self {
        let error_sink = abort.events().clone();
        let mut bridge = OutgoingBodyBridge::new(responder)
            .with_error_hook(Arc::new(move |e| error_sink.emit(MessageEvent::Error(e))))
            .with_signal(abort.signal());
        bridge.set_has_body(status_allows_body(&request_method, StatusCode::OK));

        Self { core: MessageCore::new(abort), status: StatusCode::OK, reason: None, request_method, bridge, request, events: Some(events) }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code before the head is sent.
    pub fn set_status(&mut self, status: u16) -> Result<(), BridgeError> {
        self.core.lifecycle.ensure_headers_mutable()?;
        self.status = parse_status(status)?;
        self.bridge.set_has_body(status_allows_body(&self.request_method, self.status));
        Ok(())
    }

    /// The reason phrase that will be sent: the custom one, the canonical one,
    /// or `"unknown"`.
    pub fn reason(&self) -> &str {
        self.reason.as_deref().or_else(|| self.status.canonical_reason()).unwrap_or(UNKNOWN_REASON)
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) -> Result<(), BridgeError> {
        self.core.lifecycle.ensure_headers_mutable()?;
        self.reason = Some(reason.into());
        Ok(())
    }

    /// Stages status, reason and headers. Nothing reaches the transport until
    /// the first flush.
    ///
    /// # Errors
    ///
    /// - [`StateError::HeadersSent`](crate::protocol::StateError::HeadersSent)
    ///   once the head is out
    /// - [`ProtocolError::InvalidStatus`] outside `100..=999`
    /// - a validation or protocol error from `headers`
    ///
    /// A rejected call changes nothing.
    pub fn write_head(&mut self, status: u16, reason: Option<&str>, headers: impl Into<HeaderInit>) -> Result<&mut Self, BridgeError> {
        self.core.lifecycle.ensure_headers_mutable()?;
        let status = parse_status(status)?;
        self.core.apply_headers(headers.into())?;

        self.status = status;
        if let Some(reason) = reason {
            self.reason = Some(reason.to_owned());
        }
        self.bridge.set_has_body(status_allows_body(&self.request_method, status));
        self.core.lifecycle.stage_headers()?;
        Ok(self)
    }

    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.writev(vec![chunk.into()])
    }

    /// Writes chunks in order.
    ///
    /// # Errors
    ///
    /// [`StateError::WriteAfterFinish`](crate::protocol::StateError::WriteAfterFinish)
    /// after `finish`, `destroy`, or once the exchange was aborted.
    pub fn writev(&mut self, chunks: Vec<Bytes>) -> Result<(), BridgeError> {
        self.settle_abort();
        self.core.lifecycle.ensure_writable()?;

        let Self { core, status, reason, bridge, .. } = self;
        let outcome = bridge.writev(chunks, |size| response_head(core, *status, reason.as_deref(), size, true))?;

        match outcome {
            WriteOutcome::Buffered => self.core.lifecycle.buffer(),
            WriteOutcome::Promoted | WriteOutcome::Forwarded => self.core.lifecycle.stream(),
            WriteOutcome::Discarded => trace!(status = %self.status, "response cannot carry a body"),
        }
        Ok(())
    }

    /// Finishes the response.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyFinished`](crate::protocol::StateError::AlreadyFinished)
    /// on a second call, without any other effect.
    pub fn finish(&mut self) -> Result<(), BridgeError> {
        self.settle_abort();
        self.core.lifecycle.ensure_finishable()?;

        let has_body = self.bridge.has_body();
        let Self { core, status, reason, bridge, .. } = self;
        let outcome = bridge.finish(|size| response_head(core, *status, reason.as_deref(), size, has_body))?;

        if outcome == FinishOutcome::Replied {
            self.core.lifecycle.send_headers();
        }
        self.core.lifecycle.finish();
        self.core.abort.emit_close();
        self.request.complete();
        Ok(())
    }

    /// Writes a last chunk and finishes.
    pub fn finish_with(&mut self, chunk: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.write(chunk)?;
        self.finish()
    }

    /// Tears the response down: a streaming body is aborted, an unsent reply
    /// is dropped. Emits `Error` for a non-abort `error`, then `Close` once.
    pub fn destroy(&mut self, error: Option<BridgeError>) {
        self.bridge.destroy();
        self.core.lifecycle.abort();
        self.core.abort.abort();
        if let Some(e) = error {
            if !e.is_abort() {
                self.core.abort.emit(MessageEvent::Error(e));
            }
        }
        self.core.abort.emit_close();
    }

    pub fn take_events(&mut self) -> Option<Events<MessageEvent>> {
        self.events.take()
    }

    /// Whether the exchange was aborted underneath the response.
    pub fn is_aborted(&self) -> bool {
        self.core.abort.is_aborted()
    }

    /// Catches up with an abort signal fired from outside, e.g. by the peer
    /// going away: the bridge is torn down and the response closed.
    fn settle_abort(&mut self) {
        if !self.core.abort.is_aborted() || self.core.lifecycle.is_aborted() {
            return;
        }
        debug!("exchange aborted, tear down response");
        self.bridge.destroy();
        self.core.lifecycle.abort();
        self.core.abort.emit_close();
    }
}

fn response_head(core: &MessageCore, status: StatusCode, reason: Option<&str>, size: PayloadSize, has_body: bool) -> Result<ResponseHead, BridgeError> {
    let mut headers = core.header_map()?;
    if let PayloadSize::Length(length) = size {
        if has_body && !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
    }
    let reason = reason.or_else(|| status.canonical_reason()).unwrap_or(UNKNOWN_REASON);
    Ok(build_head(status, reason, headers))
}
