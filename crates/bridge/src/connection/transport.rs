//! The primitives the bridge consumes from a transport.
//!
//! A transport owns sockets, framing and TLS. The bridge only needs three
//! things from it: a way to accept exchanges ([`ServeTransport`]), a way to
//! issue requests ([`RequestIssuer`]) and a way to hand back a response
//! ([`Responder`]). Bodies cross the boundary as [`PullSource`] inbound and as
//! [`OutboundBody`] outbound.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::oneshot;
use http::{HeaderMap, Method, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::protocol::body::{OutboundBody, PullSource};
use crate::protocol::{ResponseHead, TransportError};
use crate::server::{ListenConfig, TlsOptions};

/// The reason phrase of a response, carried in the head's extensions since
/// `http::Response` has no slot for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// A complete response as handed to the transport: the head, sent once, and a
/// body that is either already complete or pulled on demand.
#[derive(Debug)]
pub struct Reply {
    pub head: ResponseHead,
    pub body: OutboundBody,
}

impl Reply {
    /// The reason phrase to send: the custom one if set, else the canonical one.
    pub fn reason(&self) -> Option<&str> {
        match self.head.extensions().get::<ReasonPhrase>() {
            Some(reason) => Some(reason.0.as_str()),
            None => self.head.status().canonical_reason(),
        }
    }
}

/// Accepts the single reply of an exchange.
#[cfg_attr(test, mockall::automock)]
pub trait Responder: Send {
    fn reply(&mut self, reply: Reply);
}

/// A [`Responder`] forwarding the reply over a oneshot channel.
#[derive(Debug)]
pub struct ChannelResponder {
    tx: Option<oneshot::Sender<Reply>>,
}

/// Creates a responder together with the receiving end the transport awaits.
pub fn reply_channel() -> (ChannelResponder, oneshot::Receiver<Reply>) {
    let (tx, rx) = oneshot::channel();
    (ChannelResponder { tx: Some(tx) }, rx)
}

impl Responder for ChannelResponder {
    fn reply(&mut self, reply: Reply) {
        let Some(tx) = self.tx.take() else {
            trace!("reply already sent, drop the second one");
            return;
        };
        if tx.send(reply).is_err() {
            trace!("transport no longer waits for the reply");
        }
    }
}

/// One inbound request together with the means to answer it.
pub struct Exchange {
    pub request: Request<Box<dyn PullSource>>,
    pub responder: Box<dyn Responder>,
    /// cancelled by the transport when the peer goes away
    pub disconnect: CancellationToken,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("disconnected", &self.disconnect.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Receives every exchange accepted by a transport.
pub trait ExchangeHandler: Send + Sync {
    fn handle(&self, exchange: Exchange);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddress::Inet(addr) => write!(f, "{addr}"),
            ListenAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Handle of a running listener.
pub trait ServeHandle: Send + Sync {
    fn address(&self) -> ListenAddress;

    /// Sets the idle timeout of connections, in whole seconds.
    fn set_idle_timeout(&self, secs: u64);

    /// Stops accepting. A forced stop also drops open connections.
    fn stop(&self, force: bool);
}

pub trait ServeTransport: Send + Sync {
    fn serve(&self, config: ListenConfig, handler: Arc<dyn ExchangeHandler>) -> Result<Box<dyn ServeHandle>, TransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Redirect {
    #[default]
    Manual,
    Follow,
}

/// Everything a transport needs to issue one request.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<OutboundBody>,
    pub redirect: Redirect,
    pub proxy: Option<String>,
    pub tls: Option<TlsOptions>,
    pub unix_path: Option<PathBuf>,
    pub keepalive: bool,
    pub signal: CancellationToken,
}

#[async_trait]
pub trait RequestIssuer: Send + Sync {
    async fn issue(&self, request: OutboundRequest) -> Result<Response<Box<dyn PullSource>>, TransportError>;
}
