//! Server side of the bridge.
//!
//! A [`Server`] listens through a [`ServeTransport`](crate::connection::ServeTransport)
//! and turns each accepted exchange into an
//! [`IncomingMessage`](crate::message::IncomingMessage) and a [`ServerResponse`].

mod http_server;
mod options;
mod response;

pub use http_server::Server;
pub use options::{ListenConfig, ServerOptions, TlsOptions};
pub use response::{ServerResponse, UNKNOWN_REASON, parse_status};
