use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::poll_fn;
use http::{HeaderMap, Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::protocol::{BridgeError, PayloadItem, PayloadSize, TransportError};

/// One read of a [`PullSource`]: every value that was available, and whether
/// the source is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadMany {
    pub done: bool,
    pub values: Vec<Bytes>,
}

impl ReadMany {
    pub fn chunks(values: Vec<Bytes>) -> Self {
        Self { done: false, values }
    }

    pub fn done() -> Self {
        Self { done: true, values: Vec::new() }
    }
}

/// Pull-based body source provided by a transport.
pub trait PullSource: Send + 'static {
    /// Reads everything currently available. Sources with data at hand
    /// return `Poll::Ready` on the first poll.
    fn poll_read_many(&mut self, cx: &mut Context<'_>) -> Poll<Result<ReadMany, TransportError>>;

    /// Releases the source. Called exactly once by the reader.
    fn cancel(&mut self) -> Result<(), TransportError>;
}

impl<S: PullSource + ?Sized> PullSource for Box<S> {
    fn poll_read_many(&mut self, cx: &mut Context<'_>) -> Poll<Result<ReadMany, TransportError>> {
        (**self).poll_read_many(cx)
    }

    fn cancel(&mut self) -> Result<(), TransportError> {
        (**self).cancel()
    }
}

/// Push-based consumer of an inbound body.
pub trait PushConsumer: Send {
    /// Delivers a chunk, or the end of the body.
    fn push(&mut self, item: PayloadItem);

    fn is_destroyed(&self) -> bool;

    /// Fails the body with `error`. No further items are pushed afterwards.
    fn destroy(&mut self, error: BridgeError);
}

/// How a reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// the source was exhausted and the end of body was pushed
    Completed,
    /// the abort signal fired, or the source reported an abort
    Aborted,
    /// the consumer was destroyed underneath the reader
    Destroyed,
    /// the source failed and the consumer was destroyed with its error
    Failed,
}

/// Drives a [`PullSource`] into a [`PushConsumer`].
///
/// Reads race the abort signal, so an abort stops the reader even while it is
/// suspended on a slow source. The source is cancelled exactly once whichever
/// way the reader stops, including when it is dropped mid-read.
#[derive(Debug)]
pub struct IncomingBodyReader<S: PullSource> {
    source: S,
    cancelled: bool,
    abort: CancellationToken,
}

impl<S: PullSource> IncomingBodyReader<S> {
    pub fn new(source: S, abort: CancellationToken) -> Self {
        Self { source, cancelled: false, abort }
    }

    /// Reads until the source is done, the consumer is destroyed or the
    /// message is aborted. Only a completed read pushes the end of body.
    pub async fn run<C: PushConsumer>(mut self, consumer: &mut C) -> ReaderExit {
        let exit = self.read_loop(consumer).await;
        trace!(?exit, "incoming body reader stopped");
        self.cancel_source();
        exit
    }

    /// Short circuit for messages that cannot carry a body: the end of body is
    /// pushed right away and the source is released unread.
    pub fn skip<C: PushConsumer>(mut self, consumer: &mut C) -> ReaderExit {
        consumer.push(PayloadItem::Eof);
        self.cancel_source();
        ReaderExit::Completed
    }

    async fn read_loop<C: PushConsumer>(&mut self, consumer: &mut C) -> ReaderExit {
        loop {
            if self.abort.is_cancelled() {
                return ReaderExit::Aborted;
            }
            if consumer.is_destroyed() {
                return ReaderExit::Destroyed;
            }

            let source = &mut self.source;
            let read = tokio::select! {
                biased;
                () = self.abort.cancelled() => return ReaderExit::Aborted,
                read = poll_fn(|cx| source.poll_read_many(cx)) => read,
            };

            match read {
                Ok(ReadMany { done, values }) => {
                    for value in values {
                        if consumer.is_destroyed() {
                            return ReaderExit::Destroyed;
                        }
                        if !value.is_empty() {
                            consumer.push(PayloadItem::Chunk(value));
                        }
                    }

                    if self.abort.is_cancelled() {
                        return ReaderExit::Aborted;
                    }
                    if done {
                        consumer.push(PayloadItem::Eof);
                        return ReaderExit::Completed;
                    }
                }

                Err(e) if e.is_abort() || self.abort.is_cancelled() => {
                    trace!(cause = %e, "suppress body read error caused by abort");
                    return ReaderExit::Aborted;
                }

                Err(e) => {
                    if consumer.is_destroyed() {
                        trace!(cause = %e, "suppress body read error after destroy");
                        return ReaderExit::Destroyed;
                    }
                    error!(cause = %e, "failed to read incoming body");
                    consumer.destroy(e.into());
                    return ReaderExit::Failed;
                }
            }
        }
    }

    fn cancel_source(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Err(e) = self.source.cancel() {
            trace!(cause = %e, "ignore failure to cancel body source");
        }
    }
}

impl<S: PullSource> Drop for IncomingBodyReader<S> {
    fn drop(&mut self) {
        self.cancel_source();
    }
}

/// Returns true if a request cannot carry a body: a method that does not
/// take one, or an explicit zero `content-length` without chunked encoding.
///
/// A request announcing no length at all may still stream a body, so it is
/// read.
pub fn request_has_no_body(method: &Method, headers: &HeaderMap) -> bool {
    const BODYLESS: [Method; 5] = [Method::GET, Method::HEAD, Method::TRACE, Method::CONNECT, Method::OPTIONS];
    BODYLESS.contains(method) || PayloadSize::from_headers(headers).is_empty()
}

/// Returns true if a response cannot carry a body: 1xx, 204 and 304, answers
/// to `HEAD`, and an explicit zero `content-length` without chunked encoding.
pub fn response_has_no_body(request_method: &Method, status: StatusCode, headers: &HeaderMap) -> bool {
    if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return true;
    }
    request_method == Method::HEAD || PayloadSize::from_headers(headers).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted reads, then stays pending forever.
    struct ScriptedSource {
        reads: VecDeque<Result<ReadMany, TransportError>>,
        cancels: Arc<AtomicUsize>,
        fail_cancel: bool,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Result<ReadMany, TransportError>>) -> (Self, Arc<AtomicUsize>) {
            let cancels = Arc::new(AtomicUsize::new(0));
            (Self { reads: reads.into(), cancels: Arc::clone(&cancels), fail_cancel: false }, cancels)
        }
    }

    impl PullSource for ScriptedSource {
        fn poll_read_many(&mut self, _cx: &mut Context<'_>) -> Poll<Result<ReadMany, TransportError>> {
            match self.reads.pop_front() {
                Some(read) => Poll::Ready(read),
                None => Poll::Pending,
            }
        }

        fn cancel(&mut self) -> Result<(), TransportError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancel { Err(TransportError::body("already released")) } else { Ok(()) }
        }
    }

    #[derive(Default)]
    struct Recorder {
        items: Vec<PayloadItem>,
        destroyed: Option<String>,
    }

    impl PushConsumer for Recorder {
        fn push(&mut self, item: PayloadItem) {
            self.items.push(item);
        }

        fn is_destroyed(&self) -> bool {
            self.destroyed.is_some()
        }

        fn destroy(&mut self, error: BridgeError) {
            self.destroyed = Some(error.to_string());
        }
    }

    fn chunk(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn pushes_chunks_in_order_then_one_eof() {
        let (source, cancels) = ScriptedSource::new(vec![
            Ok(ReadMany::chunks(vec![chunk("a"), chunk("b")])),
            Ok(ReadMany::chunks(vec![chunk("c")])),
            Ok(ReadMany::done()),
        ]);
        let mut recorder = Recorder::default();

        let exit = IncomingBodyReader::new(source, CancellationToken::new()).run(&mut recorder).await;

        assert_eq!(exit, ReaderExit::Completed);
        assert_eq!(recorder.items, vec![PayloadItem::Chunk(chunk("a")), PayloadItem::Chunk(chunk("b")), PayloadItem::Chunk(chunk("c")), PayloadItem::Eof]);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_while_suspended_stops_without_eof() {
        let (source, cancels) = ScriptedSource::new(vec![Ok(ReadMany::chunks(vec![chunk("a")]))]);
        let abort = CancellationToken::new();
        let mut recorder = Recorder::default();

        let reader = IncomingBodyReader::new(source, abort.clone());
        let (exit, ()) = tokio::join!(reader.run(&mut recorder), async {
            tokio::task::yield_now().await;
            abort.cancel();
        });

        assert_eq!(exit, ReaderExit::Aborted);
        assert_eq!(recorder.items, vec![PayloadItem::Chunk(chunk("a"))]);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn source_error_destroys_consumer() {
        let (mut source, cancels) = ScriptedSource::new(vec![Err(TransportError::body("connection reset"))]);
        source.fail_cancel = true;
        let mut recorder = Recorder::default();

        let exit = IncomingBodyReader::new(source, CancellationToken::new()).run(&mut recorder).await;

        assert_eq!(exit, ReaderExit::Failed);
        assert!(recorder.items.is_empty());
        assert!(recorder.destroyed.unwrap().contains("connection reset"));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_classified_errors_are_suppressed() {
        let interrupted = TransportError::io(io::Error::new(io::ErrorKind::Interrupted, "aborted"));
        let (source, _cancels) = ScriptedSource::new(vec![Err(interrupted)]);
        let mut recorder = Recorder::default();

        let exit = IncomingBodyReader::new(source, CancellationToken::new()).run(&mut recorder).await;

        assert_eq!(exit, ReaderExit::Aborted);
        assert!(recorder.destroyed.is_none());
        assert!(recorder.items.is_empty());
    }

    #[test]
    fn skip_signals_end_with_zero_chunks() {
        let (source, cancels) = ScriptedSource::new(vec![Ok(ReadMany::chunks(vec![chunk("ignored")]))]);
        let mut recorder = Recorder::default();

        let exit = IncomingBodyReader::new(source, CancellationToken::new()).skip(&mut recorder);

        assert_eq!(exit, ReaderExit::Completed);
        assert_eq!(recorder.items, vec![PayloadItem::Eof]);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_reader_cancels_once() {
        let (source, cancels) = ScriptedSource::new(Vec::new());
        drop(IncomingBodyReader::new(source, CancellationToken::new()));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_body_presence() {
        let mut headers = HeaderMap::new();
        assert!(!request_has_no_body(&Method::POST, &headers));
        assert!(request_has_no_body(&Method::OPTIONS, &headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert!(!request_has_no_body(&Method::POST, &headers));
        assert!(request_has_no_body(&Method::GET, &headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(request_has_no_body(&Method::PUT, &headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(!request_has_no_body(&Method::PUT, &headers));

        headers.remove(TRANSFER_ENCODING);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("nope"));
        assert!(!request_has_no_body(&Method::PUT, &headers));
    }

    #[test]
    fn response_body_presence() {
        let headers = HeaderMap::new();
        assert!(response_has_no_body(&Method::GET, StatusCode::NO_CONTENT, &headers));
        assert!(response_has_no_body(&Method::GET, StatusCode::NOT_MODIFIED, &headers));
        assert!(response_has_no_body(&Method::GET, StatusCode::CONTINUE, &headers));
        assert!(response_has_no_body(&Method::HEAD, StatusCode::OK, &headers));
        assert!(!response_has_no_body(&Method::GET, StatusCode::OK, &headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(response_has_no_body(&Method::GET, StatusCode::OK, &headers));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(!response_has_no_body(&Method::GET, StatusCode::OK, &headers));
    }
}
