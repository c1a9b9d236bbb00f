use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::connection::{Exchange, ExchangeHandler, ListenAddress, ServeHandle, ServeTransport};
use crate::ensure;
use crate::lifecycle::{AbortCoordinator, EventSink, Events, ServerEvent, events};
use crate::message::IncomingMessage;
use crate::protocol::{BridgeError, StateError};
use crate::server::{ListenConfig, ServerOptions, ServerResponse};
use crate::utils::lock;

/// An HTTP server on top of a [`ServeTransport`].
///
/// Every accepted exchange is surfaced as a [`ServerEvent::Request`] carrying
/// the [`IncomingMessage`] and the [`ServerResponse`] answering it.
pub struct Server {
    transport: Arc<dyn ServeTransport>,
    options: ServerOptions,
    handle: Mutex<Option<Box<dyn ServeHandle>>>,
    sink: EventSink<ServerEvent>,
    events: Option<Events<ServerEvent>>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("options", &self.options).field("address", &self.address()).finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server; nothing is bound until [`Server::listen`].
    ///
    /// # Errors
    ///
    /// A validation error if the TLS options carry an empty entry.
    pub fn new(transport: Arc<dyn ServeTransport>, options: ServerOptions) -> Result<Self, BridgeError> {
        if let Some(tls) = &options.tls {
            tls.validate()?;
        }
        let (sink, events) = events();
        Ok(Self { transport, options, handle: Mutex::new(None), sink, events: Some(events) })
    }

    /// Takes the receiver of the server's events. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<Events<ServerEvent>> {
        self.events.take()
    }

    /// Starts listening.
    ///
    /// A failure of the transport is not returned: it is logged and emitted as
    /// [`ServerEvent::Error`], and the server stays stopped.
    ///
    /// # Errors
    ///
    /// [`StateError::AlreadyListening`] while a listener is running.
    pub fn listen(&self, config: ListenConfig) -> Result<(), BridgeError> {
        let mut handle = lock(&self.handle);
        ensure!(handle.is_none(), StateError::AlreadyListening);

        let mut config = config.normalized();
        if config.tls.is_none() {
            config.tls = self.options.tls.clone().filter(|tls| tls.is_enabled());
        }

        let dispatcher = Arc::new(Dispatcher { sink: self.sink.clone(), request_timeout_ms: self.options.request_timeout_ms });
        match self.transport.serve(config, dispatcher) {
            Ok(serving) => {
                let address = serving.address();
                info!(%address, "server listening");
                *handle = Some(serving);
                self.sink.emit(ServerEvent::Listening(address));
            }
            Err(e) => {
                error!(cause = %e, "failed to listen");
                self.sink.emit(ServerEvent::Error(e.into()));
            }
        }
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.handle).is_some()
    }

    /// The bound address, once listening.
    pub fn address(&self) -> Option<ListenAddress> {
        lock(&self.handle).as_ref().map(|handle| handle.address())
    }

    /// Sets the connection idle timeout. Milliseconds are rounded up to whole
    /// seconds; `0` disables it.
    ///
    /// # Errors
    ///
    /// [`StateError::NotRunning`] when not listening.
    pub fn set_timeout(&self, ms: u64) -> Result<(), BridgeError> {
        let handle = lock(&self.handle);
        let Some(handle) = handle.as_ref() else {
            return Err(StateError::NotRunning.into());
        };
        handle.set_idle_timeout(ms.div_ceil(1000));
        Ok(())
    }

    /// Stops accepting and emits [`ServerEvent::Close`]. Open connections are
    /// left to finish.
    ///
    /// # Errors
    ///
    /// [`StateError::NotRunning`] when not listening.
    pub fn close(&self) -> Result<(), BridgeError> {
        let handle = lock(&self.handle).take().ok_or(StateError::NotRunning)?;
        handle.stop(false);
        info!("server closed");
        self.sink.emit(ServerEvent::Close);
        Ok(())
    }

    /// Drops every open connection. The listener keeps accepting.
    pub fn close_all_connections(&self) {
        match lock(&self.handle).as_ref() {
            Some(handle) => handle.stop(true),
            None => debug!("no listener, no connections to close"),
        }
    }
}

/// Turns transport exchanges into request/response pairs.
struct Dispatcher {
    sink: EventSink<ServerEvent>,
    request_timeout_ms: u64,
}

impl ExchangeHandler for Dispatcher {
    fn handle(&self, exchange: Exchange) {
        let Exchange { request, responder, disconnect } = exchange;
        let method = request.method().clone();
        debug!(%method, uri = %request.uri(), "dispatch request");

        let (request_sink, request_events) = events();
        let request = IncomingMessage::from_request(request, AbortCoordinator::linked(&disconnect, request_sink), request_events);
        if self.request_timeout_ms > 0 {
            request.set_timeout(self.request_timeout_ms);
        }

        let (response_sink, response_events) = events();
        let response_abort = AbortCoordinator::linked(&disconnect, response_sink);
        let response = ServerResponse::new(method, request.handle(), responder, response_abort.clone(), response_events);

        match Handle::try_current() {
            Ok(runtime) => {
                let handle = request.handle();
                runtime.spawn(async move {
                    tokio::select! {
                        () = disconnect.cancelled() => {
                            debug!("peer went away before the exchange completed");
                            handle.destroy(None);
                            response_abort.emit_close();
                        }
                        () = response_abort.closed() => {}
                    }
                });
            }
            Err(_) => warn!("no async runtime, disconnects of this exchange are not watched"),
        }

        self.sink.emit(ServerEvent::Request(request, response));
    }
}
