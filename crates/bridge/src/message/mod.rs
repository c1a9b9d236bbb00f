//! Messages as seen by users.
//!
//! - [`OutgoingMessage`]: header and lifecycle surface shared by server
//!   responses and client requests, backed by a [`MessageCore`]
//! - [`IncomingMessage`]: inbound request or response with a lazily read body

mod incoming;
mod outgoing;

pub use outgoing::{MessageCore, OutgoingMessage};
pub(crate) use incoming::IncomingHandle;
pub use incoming::{IncomingMessage, MessageKind};
