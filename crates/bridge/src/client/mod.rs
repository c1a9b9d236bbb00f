//! Client side of the bridge.
//!
//! A [`Client`] creates [`ClientRequest`]s from [`RequestOptions`], filling in
//! the defaults of its [`Agent`]. Requests are issued through a
//! [`RequestIssuer`](crate::connection::RequestIssuer).

mod agent;
mod http_client;
mod options;
mod request;

pub use agent::{Agent, AgentOptions, DEFAULT_KEEP_ALIVE_MSECS, DEFAULT_MAX_FREE_SOCKETS, DEFAULT_PORT, DEFAULT_PROTOCOL};
pub use http_client::Client;
pub use options::RequestOptions;
pub use request::ClientRequest;
