use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use crate::protocol::body::direct_stream::DirectStream;
use crate::protocol::{BridgeError, PayloadSize};

/// Body of an outgoing message as handed to a transport.
///
/// `Empty` and `Full` are produced by the small-body fast path, `Stream` once
/// a message was promoted to streaming.
#[derive(Debug, Default)]
pub enum OutboundBody {
    #[default]
    Empty,
    Full(Option<Bytes>),
    Stream(DirectStream),
}

impl OutboundBody {
    pub fn full(bytes: Bytes) -> Self {
        if bytes.is_empty() { OutboundBody::Empty } else { OutboundBody::Full(Some(bytes)) }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OutboundBody::Stream(_))
    }

    pub fn payload_size(&self) -> PayloadSize {
        match self {
            OutboundBody::Empty => PayloadSize::Empty,
            OutboundBody::Full(Some(bytes)) => PayloadSize::Length(bytes.len() as u64),
            OutboundBody::Full(None) => PayloadSize::Empty,
            OutboundBody::Stream(_) => PayloadSize::Chunked,
        }
    }
}

impl From<DirectStream> for OutboundBody {
    fn from(stream: DirectStream) -> Self {
        OutboundBody::Stream(stream)
    }
}

impl Body for OutboundBody {
    type Data = Bytes;
    type Error = BridgeError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            OutboundBody::Empty => Poll::Ready(None),
            OutboundBody::Full(bytes) => Poll::Ready(bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            OutboundBody::Stream(stream) => Pin::new(stream).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            OutboundBody::Empty | OutboundBody::Full(None) => true,
            OutboundBody::Full(Some(_)) => false,
            OutboundBody::Stream(stream) => stream.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn full_body_yields_once() {
        let body = OutboundBody::full(Bytes::from_static(b"hello"));
        assert_eq!(body.size_hint().exact(), Some(5));
        assert_eq!(body.collect().await.unwrap().to_bytes(), "hello");
    }

    #[test]
    fn empty_bytes_collapse_to_empty() {
        let body = OutboundBody::full(Bytes::new());
        assert!(body.is_end_stream());
        assert_eq!(body.payload_size(), PayloadSize::Empty);
    }
}
