//! The transport boundary.
//!
//! The bridge does no socket I/O itself. Listeners, connections and request
//! issuance are provided by a transport through the traits of this module.
//!
//! # Components
//!
//! - [`ServeTransport`] / [`ServeHandle`]: accepts exchanges and manages the listener
//! - [`ExchangeHandler`]: receives every accepted [`Exchange`]
//! - [`Responder`]: takes the single [`Reply`] of an exchange
//! - [`RequestIssuer`]: issues one [`OutboundRequest`] and resolves to the response

mod transport;

pub use transport::{
    ChannelResponder, Exchange, ExchangeHandler, ListenAddress, OutboundRequest, ReasonPhrase, Redirect, Reply, RequestIssuer, Responder, ServeHandle,
    ServeTransport, reply_channel,
};

#[cfg(test)]
pub(crate) use transport::MockResponder;
