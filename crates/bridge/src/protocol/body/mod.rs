//! Body streaming between push-style writers and pull-style transports.
//!
//! # Architecture
//!
//! Outbound, a message writes chunks whenever it likes while the transport
//! pulls them only when it is ready:
//!
//! - [`OutgoingBodyBridge`]: server response side, holds the first chunk back
//!   for the small-body fast path and promotes to streaming on the second
//! - [`PendingUpload`]: client request side, same promotion rule, and decides
//!   when the request gets issued
//! - [`DirectStream`]: the pull primitive handed to the transport, fed through
//!   a [`Controller`] and throttled by a one-shot [`Completion`]
//!
//! Inbound, a transport offers a pull-based [`PullSource`] while users read an
//! [`IncomingBody`]:
//!
//! - [`IncomingBodyReader`]: drains the source into a [`PushConsumer`],
//!   racing the message's abort signal
//! - [`request_has_no_body`] / [`response_has_no_body`]: decide when the
//!   reader can be skipped altogether
//!
//! # Backpressure
//!
//! Every production cycle of a [`DirectStream`] hands out exactly one
//! [`Completion`]. The stream does not call its producer again before that
//! completion settles, and the writer side settles it on the next chunk or on
//! finish. Nothing else resumes production.

mod direct_stream;
mod feed;
mod incoming;
mod incoming_body;
mod outbound;
mod outgoing;
mod rendezvous;
mod upload;

pub use direct_stream::{Controller, DirectStream, Produce};
pub use incoming::{IncomingBodyReader, PullSource, PushConsumer, ReadMany, ReaderExit, request_has_no_body, response_has_no_body};
pub use incoming_body::{BodyPusher, BodySource, IncomingBody, StreamSource, body_channel};
pub use outbound::OutboundBody;
pub use outgoing::{ErrorHook, FinishOutcome, OutgoingBodyBridge, WriteOutcome};
pub use rendezvous::{Completion, Deferred, completion};
pub use upload::{PendingUpload, UploadReady};
