//! Core protocol abstractions shared by the server and client sides.
//!
//! # Architecture
//!
//! - **Message Handling** ([`message`]): payload items and size information
//!   - [`PayloadItem`]: a body chunk or the end of body
//!   - [`PayloadSize`]: how a body is framed
//!
//! - **Headers** ([`header`]): the case-insensitive [`HeaderStore`] owned by
//!   outgoing messages, its validation and its materialized forms
//!
//! - **Response Processing** ([`response`]): [`ResponseHead`], the head of a
//!   response before its body is attached
//!
//! - **Body Streaming** ([`body`]): the push/pull bridges in both directions
//!
//! - **Error Handling** ([`error`]): the error taxonomy
//!   - [`BridgeError`]: top level error
//!   - [`ValidationError`], [`ProtocolError`]: rejected input, returned synchronously
//!   - [`TransportError`]: failures reported by a transport
//!   - [`StateError`]: calls made out of order

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod response;
pub use response::ResponseHead;
pub(crate) use response::build_head;

mod error;
pub use error::BoxError;
pub use error::BridgeError;
pub use error::ProtocolError;
pub use error::StateError;
pub use error::TransportError;
pub use error::ValidationError;

pub mod body;
pub mod header;

pub use header::HeaderStore;
