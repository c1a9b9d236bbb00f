use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use http_body::{Body, Frame};
use http_body_util::BodyDataStream;
use http_body_util::BodyExt;
use tracing::trace;

use crate::protocol::body::incoming::{PullSource, PushConsumer, ReadMany};
use crate::protocol::{BoxError, BridgeError, PayloadItem, TransportError};

type Item = Result<PayloadItem, BridgeError>;

/// Creates the two ends of an inbound body.
///
/// The [`BodyPusher`] is fed by an [`IncomingBodyReader`]; the
/// [`IncomingBody`] is what the user reads.
///
/// [`IncomingBodyReader`]: crate::protocol::body::IncomingBodyReader
pub fn body_channel() -> (BodyPusher, IncomingBody) {
    let (tx, rx) = mpsc::unbounded();
    (BodyPusher { tx, destroyed: false, on_complete: None }, IncomingBody { rx, done: false })
}

/// The push end of an inbound body.
pub struct BodyPusher {
    tx: mpsc::UnboundedSender<Item>,
    destroyed: bool,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for BodyPusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyPusher").field("destroyed", &self.is_destroyed()).finish_non_exhaustive()
    }
}

impl BodyPusher {
    /// Registers a callback run when the end of body is pushed.
    #[must_use]
    pub fn on_complete<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl PushConsumer for BodyPusher {
    fn push(&mut self, item: PayloadItem) {
        if self.destroyed {
            return;
        }
        if item.is_eof() {
            if let Some(on_complete) = self.on_complete.take() {
                on_complete();
            }
        }
        if self.tx.unbounded_send(Ok(item)).is_err() {
            trace!("incoming body dropped by its reader");
            self.destroyed = true;
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed || self.tx.is_closed()
    }

    fn destroy(&mut self, error: BridgeError) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let _ = self.tx.unbounded_send(Err(error));
        self.tx.close_channel();
    }
}

/// An inbound body, readable as a [`Stream`] of chunks or as an
/// [`http_body::Body`].
///
/// A body whose producer went away before the end of body was delivered
/// yields a single [`BridgeError::Aborted`].
pub struct IncomingBody {
    rx: mpsc::UnboundedReceiver<Item>,
    done: bool,
}

impl fmt::Debug for IncomingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingBody").field("done", &self.done).finish_non_exhaustive()
    }
}

impl IncomingBody {
    /// Collects the whole body into one buffer.
    pub async fn bytes(self) -> Result<Bytes, BridgeError> {
        Ok(BodyExt::collect(self).await?.to_bytes())
    }
}

impl Stream for IncomingBody {
    type Item = Result<Bytes, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_next_unpin(cx)) {
            Some(Ok(PayloadItem::Chunk(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Some(Ok(PayloadItem::Eof)) => {
                self.done = true;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.done = true;
                Poll::Ready(Some(Err(BridgeError::Aborted)))
            }
        }
    }
}

impl Body for IncomingBody {
    type Data = Bytes;
    type Error = BridgeError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

/// Adapts a [`Stream`] of byte chunks into a [`PullSource`].
///
/// Every chunk that is ready is gathered into one read.
pub struct StreamSource<S> {
    stream: Option<S>,
    failed: Option<TransportError>,
}

impl<S> fmt::Debug for StreamSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").field("cancelled", &self.stream.is_none()).finish_non_exhaustive()
    }
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream: Some(stream), failed: None }
    }
}

impl<B> StreamSource<BodyDataStream<B>>
where
    B: Body<Data = Bytes>,
{
    /// Adapts any `http_body::Body`. Trailers are ignored.
    pub fn from_body(body: B) -> Self {
        Self::new(body.into_data_stream())
    }
}

impl<S, E> PullSource for StreamSource<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Into<BoxError>,
{
    fn poll_read_many(&mut self, cx: &mut Context<'_>) -> Poll<Result<ReadMany, TransportError>> {
        if let Some(e) = self.failed.take() {
            return Poll::Ready(Err(e));
        }
        let Some(stream) = &mut self.stream else {
            return Poll::Ready(Ok(ReadMany::done()));
        };

        let mut values = Vec::new();
        loop {
            match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => values.push(bytes),
                Poll::Ready(Some(Err(e))) => {
                    let e = TransportError::Other(e.into());
                    if values.is_empty() {
                        return Poll::Ready(Err(e));
                    }
                    self.failed = Some(e);
                    return Poll::Ready(Ok(ReadMany::chunks(values)));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(ReadMany { done: true, values })),
                Poll::Pending if values.is_empty() => return Poll::Pending,
                Poll::Pending => return Poll::Ready(Ok(ReadMany::chunks(values))),
            }
        }
    }

    fn cancel(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        Ok(())
    }
}

/// A [`StreamSource`] over an `http_body::Body`.
pub type BodySource<B> = StreamSource<BodyDataStream<B>>;
