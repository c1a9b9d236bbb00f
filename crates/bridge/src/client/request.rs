use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use http::header::UPGRADE;
use http::{Method, Response, StatusCode};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::client::{Agent, RequestOptions};
use crate::connection::{OutboundRequest, Redirect, RequestIssuer};
use crate::ensure;
use crate::lifecycle::{AbortCoordinator, Events, MessageEvent, events};
use crate::message::{IncomingMessage, MessageCore, OutgoingMessage};
use crate::protocol::body::{OutboundBody, PendingUpload, PullSource, UploadReady};
use crate::protocol::header::{HeaderStore, is_token};
use crate::protocol::{BridgeError, TransportError, ValidationError};
use crate::server::TlsOptions;

const DEFAULT_HOST: &str = "localhost";
const HTTPS: &str = "https:";

fn is_valid_path(path: &str) -> bool {
    path.chars().all(|c| ('!'..='\u{ff}').contains(&c))
}

/// An outgoing client request.
///
/// A request is issued exactly once. Up to one written chunk is kept in memory
/// and the request is issued on [`finish`](ClientRequest::finish) with a
/// complete body. A second chunk issues it right away with a streaming body
/// that replays the buffered chunks; `finish` then only closes that body.
///
/// Events arrive on [`take_events`](ClientRequest::take_events): `Socket`
/// (and `Continue` for `expect: 100-continue`) on creation, then `Response`
/// or `Upgrade`, `Abort` or `Error`, and finally `Close`.
pub struct ClientRequest {
    core: MessageCore,
    method: Method,
    protocol: String,
    host: String,
    port: u16,
    use_default_port: bool,
    path: String,
    socket_path: Option<PathBuf>,
    tls: Option<TlsOptions>,
    agent: Arc<Agent>,
    issuer: Arc<dyn RequestIssuer>,
    upload: PendingUpload,
    issued: bool,
    events: Option<Events<MessageEvent>>,
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("method", &self.method)
            .field("url", &self.target().0)
            .field("phase", &self.core.lifecycle.phase())
            .field("issued", &self.issued)
            .field("upload", &self.upload)
            .finish_non_exhaustive()
    }
}

impl OutgoingMessage for ClientRequest {
    fn core(&self) -> &MessageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut MessageCore {
        &mut self.core
    }
}

impl ClientRequest {
    /// Validates `options` and creates the request. `agent` is used unless the
    /// options carry their own.
    ///
    /// # Errors
    ///
    /// A validation error for a protocol differing from the agent's, a path
    /// with unescaped characters, a method that is not a token, or invalid
    /// headers; a protocol error for an odd raw header array.
    pub fn new(options: RequestOptions, agent: Arc<Agent>, issuer: Arc<dyn RequestIssuer>) -> Result<Self, BridgeError> {
        let agent = options.agent.unwrap_or(agent);

        let protocol = options.protocol.unwrap_or_else(|| agent.protocol().to_owned());
        ensure!(protocol == agent.protocol(), ValidationError::InvalidProtocol { protocol, expected: agent.protocol().to_owned() });

        let path = options.path.filter(|path| !path.is_empty()).unwrap_or_else(|| "/".to_owned());
        ensure!(is_valid_path(&path), ValidationError::invalid_path(path));

        let method = match options.method.filter(|method| !method.is_empty()) {
            Some(method) => {
                ensure!(is_token(&method), ValidationError::invalid_method(method));
                Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_e| ValidationError::invalid_method(&method))?
            }
            None => Method::GET,
        };

        let default_port = options.default_port.filter(|port| *port > 0).unwrap_or_else(|| agent.default_port());
        let port = options.port.filter(|port| *port > 0).unwrap_or(default_port);
        let host = options.host.filter(|host| !host.is_empty()).unwrap_or_else(|| DEFAULT_HOST.to_owned());

        let mut headers = HeaderStore::new();
        options.headers.apply(&mut headers)?;
        if let Some(auth) = options.auth.filter(|auth| !auth.is_empty()) {
            if !headers.has("authorization") {
                headers.set("Authorization", format!("Basic {}", BASE64_STANDARD.encode(auth)))?;
            }
        }
        let expect_continue = headers.get("expect").is_some_and(|expect| expect.eq_ignore_ascii_case("100-continue"));

        let (sink, events) = events();
        let abort = match &options.signal {
            Some(signal) => AbortCoordinator::linked(signal, sink),
            None => AbortCoordinator::new(sink),
        };
        let core = if headers.is_empty() { MessageCore::new(abort) } else { MessageCore::with_headers(headers, abort) };
        let has_body = !matches!(method, Method::GET | Method::HEAD | Method::OPTIONS);

        debug!(%method, %protocol, %host, port, %path, "new client request");
        let request = Self {
            core,
            method,
            protocol,
            host,
            port,
            use_default_port: port == default_port,
            path,
            socket_path: options.socket_path,
            tls: options.tls,
            agent,
            issuer,
            upload: PendingUpload::new(has_body),
            issued: false,
            events: Some(events),
        };

        request.core.abort.emit(MessageEvent::Socket);
        if expect_continue {
            request.core.abort.emit(MessageEvent::Continue);
        }
        if let Some(ms) = options.timeout.filter(|ms| *ms > 0) {
            request.core.abort.set_timeout(ms);
        }
        Ok(request)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// The url the request is issued to.
    pub fn url(&self) -> String {
        self.target().0
    }

    pub fn is_issued(&self) -> bool {
        self.issued
    }

    pub fn is_aborted(&self) -> bool {
        self.core.lifecycle.is_aborted()
    }

    /// Takes the receiver of this request's events. Only the first call
    /// returns it.
    pub fn take_events(&mut self) -> Option<Events<MessageEvent>> {
        self.events.take()
    }

    pub fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.writev(vec![chunk.into()])
    }

    /// Writes chunks in order. The write that promotes the body to a stream
    /// issues the request.
    ///
    /// # Errors
    ///
    /// [`StateError::WriteAfterFinish`](crate::protocol::StateError::WriteAfterFinish)
    /// after `finish` or `abort`.
    pub fn writev(&mut self, chunks: Vec<Bytes>) -> Result<(), BridgeError> {
        self.core.lifecycle.ensure_writable()?;
        let outbound = if self.issued { None } else { Some(self.prepare()?) };

        match self.upload.writev(chunks)? {
            Some(stream) => {
                self.core.lifecycle.stream();
                match outbound {
                    Some(outbound) => self.issue(outbound, Some(stream.into())),
                    None => warn!("body promoted after the request was issued"),
                }
            }
            None if self.upload.has_body() && !self.upload.is_streaming() => self.core.lifecycle.buffer(),
            None => {}
        }
        Ok(())
    }

    /// Ends the body. Issues the request unless a streaming body already did.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyFinished`](crate::protocol::StateError::AlreadyFinished)
    /// on a second call or after `abort`; nothing is issued then.
    pub fn finish(&mut self) -> Result<(), BridgeError> {
        self.core.lifecycle.ensure_finishable()?;
        let outbound = if self.issued { None } else { Some(self.prepare()?) };

        let ready = self.upload.finish()?;
        self.core.lifecycle.finish();
        match (ready, outbound) {
            (UploadReady::Issue(body), Some(outbound)) => self.issue(outbound, body),
            (UploadReady::Issue(_), None) => warn!("request already issued"),
            (UploadReady::Closed, _) => {}
        }
        Ok(())
    }

    /// Writes a last chunk and finishes.
    pub fn finish_with(&mut self, chunk: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.write(chunk)?;
        self.finish()
    }

    /// Aborts the request: a streaming body is aborted, an in-flight issuance
    /// is cancelled together with any response body. Emits `Abort` then
    /// `Close`, once each.
    pub fn abort(&mut self) {
        if !self.core.lifecycle.abort() {
            return;
        }
        self.upload.destroy();
        self.core.abort.abort();
        self.core.abort.clear_timeout();
        self.core.abort.emit_abort();
        self.core.abort.emit_close();
    }

    fn target(&self) -> (String, Option<String>) {
        let origin = if self.use_default_port {
            format!("{}//{}", self.protocol, self.host)
        } else {
            format!("{}//{}:{}", self.protocol, self.host, self.port)
        };

        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            (self.path.clone(), Some(origin))
        } else {
            (format!("{origin}{}", self.path), self.agent.proxy().map(str::to_owned))
        }
    }

    fn prepare(&self) -> Result<OutboundRequest, BridgeError> {
        let headers = self.core.header_map()?;
        let (url, proxy) = self.target();
        let tls = if self.protocol == HTTPS { self.tls.clone() } else { None };

        Ok(OutboundRequest {
            method: self.method.clone(),
            url,
            headers,
            body: None,
            redirect: Redirect::Manual,
            proxy,
            tls,
            unix_path: self.socket_path.clone(),
            keepalive: true,
            signal: self.core.abort.signal(),
        })
    }

    fn issue(&mut self, mut outbound: OutboundRequest, body: Option<OutboundBody>) {
        self.issued = true;
        self.core.lifecycle.send_headers();
        if self.upload.has_body() {
            outbound.body = body;
        }

        let abort = self.core.abort.clone();
        let Ok(runtime) = Handle::try_current() else {
            error!(url = %outbound.url, "no async runtime, request not issued");
            abort.emit(MessageEvent::Error(TransportError::issue("no async runtime").into()));
            abort.emit_close();
            return;
        };

        debug!(method = %outbound.method, url = %outbound.url, streaming = outbound.body.as_ref().is_some_and(OutboundBody::is_stream), "issue request");
        let issuer = Arc::clone(&self.issuer);
        let method = self.method.clone();
        runtime.spawn(async move {
            let signal = abort.signal();
            let result = tokio::select! {
                biased;
                () = signal.cancelled() => Err(TransportError::Aborted),
                result = issuer.issue(outbound) => result,
            };
            settle(&method, &abort, result);
        });
    }
}

fn settle(method: &Method, abort: &AbortCoordinator, result: Result<Response<Box<dyn PullSource>>, TransportError>) {
    match result {
        Ok(_) if abort.is_aborted() => debug!("drop response of an aborted request"),
        Ok(response) => {
            let upgrade = response.status() == StatusCode::SWITCHING_PROTOCOLS && response.headers().contains_key(UPGRADE);
            let (sink, events) = events();
            let message = IncomingMessage::from_response(method, response, AbortCoordinator::linked(&abort.signal(), sink), events);
            abort.emit(if upgrade { MessageEvent::Upgrade(message) } else { MessageEvent::Response(message) });
        }
        Err(e) if e.is_abort() => {
            debug!(cause = %abort.cancel_error(), "request cancelled");
            abort.emit_abort();
        }
        Err(e) => {
            error!(cause = %e, "request failed");
            abort.emit(MessageEvent::Error(e.into()));
        }
    }
    abort.clear_timeout();
    abort.emit_close();
}
