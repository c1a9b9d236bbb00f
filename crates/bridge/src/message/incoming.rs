use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::{Method, Request, Response, StatusCode, Version};
use tracing::trace;

use crate::connection::ReasonPhrase;
use crate::lifecycle::{AbortCoordinator, Events, MessageEvent};
use crate::protocol::body::{
    IncomingBody, IncomingBodyReader, PullSource, PushConsumer, ReaderExit, body_channel, request_has_no_body, response_has_no_body,
};
use crate::protocol::header::{FieldValue, Materialized};
use crate::protocol::{BridgeError, StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

#[derive(Debug)]
struct Shared {
    complete: AtomicBool,
    aborted: AtomicBool,
    abort: AbortCoordinator,
}

impl Shared {
    fn complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
        self.abort.emit_close();
    }

    fn destroy(&self, error: Option<BridgeError>) {
        if self.abort.is_closed() {
            trace!("destroy an already closed message");
            return;
        }

        if !self.complete.load(Ordering::SeqCst) && !self.aborted.swap(true, Ordering::SeqCst) {
            self.abort.emit(MessageEvent::Aborted);
        }
        self.abort.abort();

        if let Some(e) = error {
            if !e.is_abort() {
                self.abort.emit(MessageEvent::Error(e));
            }
        }
        self.abort.emit_close();
    }
}

/// Handle on an [`IncomingMessage`] kept by the code that created it.
#[derive(Debug, Clone)]
pub(crate) struct IncomingHandle {
    shared: Arc<Shared>,
}

impl IncomingHandle {
    /// Marks the message complete and closes it.
    pub(crate) fn complete(&self) {
        self.shared.complete();
    }

    pub(crate) fn destroy(&self, error: Option<BridgeError>) {
        self.shared.destroy(error);
    }

    pub(crate) async fn closed(&self) {
        self.shared.abort.closed().await;
    }
}

/// An inbound request (server side) or response (client side).
///
/// Headers are materialized once on arrival. The body is read lazily: nothing
/// is pulled from the transport until [`IncomingMessage::body`] is called, and
/// messages that cannot carry a body never start a reader at all.
pub struct IncomingMessage {
    kind: MessageKind,
    method: Method,
    url: String,
    status: Option<StatusCode>,
    status_message: Option<String>,
    version: Version,
    headers: Materialized,
    no_body: bool,
    source: Option<Box<dyn PullSource>>,
    shared: Arc<Shared>,
    events: Option<Events<MessageEvent>>,
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("no_body", &self.no_body)
            .field("complete", &self.is_complete())
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

impl IncomingMessage {
    /// Wraps an inbound request.
    pub fn from_request(request: Request<Box<dyn PullSource>>, abort: AbortCoordinator, events: Events<MessageEvent>) -> Self {
        let (parts, source) = request.into_parts();
        let no_body = request_has_no_body(&parts.method, &parts.headers);
        let url = parts.uri.path_and_query().map_or_else(|| parts.uri.to_string(), ToString::to_string);

        Self {
            kind: MessageKind::Request,
            method: parts.method,
            url,
            status: None,
            status_message: None,
            version: parts.version,
            headers: Materialized::from_header_map(&parts.headers),
            no_body,
            source: Some(source),
            shared: Self::shared(abort, no_body),
            events: Some(events),
        }
    }

    /// Wraps an inbound response to a request issued with `request_method`.
    pub fn from_response(request_method: &Method, response: Response<Box<dyn PullSource>>, abort: AbortCoordinator, events: Events<MessageEvent>) -> Self {
        let (parts, source) = response.into_parts();
        let no_body = response_has_no_body(request_method, parts.status, &parts.headers);
        let status_message = match parts.extensions.get::<ReasonPhrase>() {
            Some(reason) => Some(reason.0.clone()),
            None => parts.status.canonical_reason().map(str::to_owned),
        };

        Self {
            kind: MessageKind::Response,
            method: request_method.clone(),
            url: String::new(),
            status: Some(parts.status),
            status_message,
            version: parts.version,
            headers: Materialized::from_header_map(&parts.headers),
            no_body,
            source: Some(source),
            shared: Self::shared(abort, no_body),
            events: Some(events),
        }
    }

    fn shared(abort: AbortCoordinator, no_body: bool) -> Arc<Shared> {
        Arc::new(Shared { complete: AtomicBool::new(no_body), aborted: AtomicBool::new(false), abort })
    }

    pub(crate) fn handle(&self) -> IncomingHandle {
        IncomingHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The request method; for a response, the method of the request it answers.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target. Empty for responses.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Lowercase header map; `set-cookie` is always a list.
    pub fn headers(&self) -> &BTreeMap<String, FieldValue> {
        &self.headers.map
    }

    /// Header pairs in arrival order.
    pub fn raw_headers(&self) -> &[(String, String)] {
        &self.headers.raw_pairs
    }

    pub fn header(&self, name: &str) -> Option<&FieldValue> {
        self.headers.get(name)
    }

    pub fn has_body(&self) -> bool {
        !self.no_body
    }

    pub fn is_complete(&self) -> bool {
        self.shared.complete.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }

    /// Takes the receiver of this message's events. Only the first call
    /// returns it.
    pub fn take_events(&mut self) -> Option<Events<MessageEvent>> {
        self.events.take()
    }

    /// Starts reading the body. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`StateError::BodyTaken`] if the body was already taken.
    pub fn body(&mut self) -> Result<IncomingBody, BridgeError> {
        let source = self.source.take().ok_or(StateError::BodyTaken)?;

        let (pusher, body) = body_channel();
        let shared = Arc::clone(&self.shared);
        let mut pusher = pusher.on_complete(move || shared.complete());
        let reader = IncomingBodyReader::new(source, self.shared.abort.signal());

        if self.no_body {
            reader.skip(&mut pusher);
            return Ok(body);
        }

        let abort = self.shared.abort.clone();
        tokio::spawn(async move {
            if reader.run(&mut pusher).await == ReaderExit::Aborted {
                pusher.destroy(abort.cancel_error());
            }
        });
        Ok(body)
    }

    /// Destroys the message. Emits `Aborted` if it was not complete, `Error`
    /// for a non-abort `error`, then `Close`, each at most once.
    pub fn destroy(&self, error: Option<BridgeError>) {
        self.shared.destroy(error);
    }

    /// Arms the message timer; `0` disarms it.
    pub fn set_timeout(&self, ms: u64) {
        self.shared.abort.set_timeout(ms);
    }
}
