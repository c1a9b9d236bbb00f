//! A push/pull HTTP message streaming bridge
//!
//! This crate sits between code that writes HTTP bodies procedurally, one
//! chunk whenever it likes, and a transport that pulls body bytes only when it
//! is ready to send them. It does no socket I/O itself: listeners, connections
//! and request issuance are provided by a transport through the traits in
//! [`connection`].
//!
//! # Features
//!
//! - Small bodies are sent together with the head in a single reply
//! - Larger bodies are promoted to a pull stream without reordering chunks
//! - Backpressure through a one-shot rendezvous per production cycle
//! - Headers are materialized and handed over exactly once
//! - Abort, timeout and close coordinated per message, with single-shot events
//! - Lazy inbound bodies: nothing is read until the body is taken
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use micro_bridge::connection::ServeTransport;
//! use micro_bridge::lifecycle::ServerEvent;
//! use micro_bridge::message::OutgoingMessage;
//! use micro_bridge::protocol::BridgeError;
//! use micro_bridge::server::{ListenConfig, Server, ServerOptions};
//! use tracing::{error, info};
//!
//! async fn serve(transport: Arc<dyn ServeTransport>) -> Result<(), BridgeError> {
//!     let mut server = Server::new(transport, ServerOptions::new())?;
//!     let mut events = server.take_events().expect("events are taken once");
//!     server.listen(ListenConfig::new().port(8080))?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ServerEvent::Listening(address) => info!(%address, "start listening"),
//!             ServerEvent::Request(request, mut response) => {
//!                 info!(url = request.url(), "receiving request");
//!                 response.set_header("Content-Type", "text/plain")?;
//!                 response.finish_with("Hello World!\r\n")?;
//!             }
//!             ServerEvent::Error(e) => error!(cause = %e, "server error"),
//!             ServerEvent::Close => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: errors, headers and the body machinery
//! - [`lifecycle`]: per message state, cancellation, timers and events
//! - [`message`]: the message surface shared by both sides
//! - [`connection`]: the transport boundary
//! - [`server`]: [`server::Server`] and [`server::ServerResponse`]
//! - [`client`]: [`client::Client`] and [`client::ClientRequest`]
//!
//! # Core Components
//!
//! ## Outgoing bodies
//!
//! A response keeps its first chunk in memory. If it is finished right after,
//! the head and the chunk go out in one [`connection::Reply`]. A second write
//! promotes the body to a [`protocol::body::DirectStream`], which the
//! transport polls as an `http_body::Body`; the buffered chunk is replayed
//! first. Client requests do the same with a pending upload, issuing the
//! request either on finish or at promotion.
//!
//! ## Incoming bodies
//!
//! An [`message::IncomingMessage`] wraps a [`protocol::body::PullSource`].
//! Taking its body starts a reader that pushes chunks into an
//! [`protocol::body::IncomingBody`] until the end of the body, an abort, or
//! a failure of the source.
//!
//! ## Error Handling
//!
//! - [`protocol::BridgeError`]: top level error type
//! - [`protocol::ValidationError`] / [`protocol::ProtocolError`]: bad input, returned synchronously
//! - [`protocol::StateError`]: calls made in an order the message rejects
//! - [`protocol::TransportError`]: reported through `Error` events only
//!
//! # Limitations
//!
//! - No wire level HTTP parsing, framing or TLS handshakes; those belong to the transport
//! - Connection pooling is left to the transport, [`client::Agent`] only carries policy

pub mod client;
pub mod connection;
pub mod lifecycle;
pub mod message;
pub mod protocol;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
