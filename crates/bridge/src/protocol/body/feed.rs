use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::protocol::BridgeError;
use crate::protocol::body::direct_stream::{Controller, DirectStream};
use crate::protocol::body::rendezvous::{Completion, Deferred, completion};
use crate::utils::lock;

#[derive(Debug, Default)]
struct FeedState {
    controller: Option<Controller>,
    /// chunks written before the transport pulled for the first time
    queued: VecDeque<Bytes>,
    deferred: Option<Deferred>,
    finished: bool,
    destroyed: bool,
}

/// Push side of a promoted body.
///
/// Writers push chunks whenever they like; the [`DirectStream`] returned by
/// [`StreamFeed::promote`] pulls them on the transport's schedule. Until the
/// first pull the chunks wait in an ordered replay queue, afterwards they are
/// forwarded to the captured controller directly. Each push or close resolves
/// the outstanding completion, if any, which starts the next production cycle.
#[derive(Debug, Clone)]
pub(crate) struct StreamFeed {
    state: Arc<Mutex<FeedState>>,
    ended: CancellationToken,
}

impl StreamFeed {
    /// Creates the feed together with the stream to hand to a transport. The
    /// given chunks are replayed first, in order.
    pub(crate) fn promote<I>(chunks: I) -> (Self, DirectStream)
    where
        I: IntoIterator<Item = Bytes>,
    {
        let state = FeedState { queued: chunks.into_iter().collect(), ..FeedState::default() };
        let feed = Self { state: Arc::new(Mutex::new(state)), ended: CancellationToken::new() };

        let producer = feed.clone();
        let stream = DirectStream::new(move |controller: &Controller| producer.produce(controller));
        (feed, stream)
    }

    fn produce(&self, controller: &Controller) -> Result<Option<Completion>, BridgeError> {
        let mut state = lock(&self.state);
        if state.destroyed {
            controller.abort();
            return Ok(None);
        }

        if state.controller.is_none() {
            state.controller = Some(controller.clone());
        }

        while let Some(chunk) = state.queued.pop_front() {
            controller.write(chunk);
        }

        if state.finished {
            controller.close();
            return Ok(None);
        }

        let (deferred, completion) = completion();
        state.deferred = Some(deferred);
        Ok(Some(completion))
    }

    pub(crate) fn push(&self, chunk: Bytes) {
        let mut state = lock(&self.state);
        if state.destroyed || state.finished {
            trace!(size = chunk.len(), "discard chunk pushed to a closed feed");
            return;
        }

        match &state.controller {
            Some(controller) => {
                controller.write(chunk);
            }
            None => state.queued.push_back(chunk),
        }

        if let Some(deferred) = state.deferred.take() {
            deferred.resolve();
        }
    }

    /// Marks the end of the body. Chunks still queued are delivered first.
    pub(crate) fn close(&self) {
        let mut state = lock(&self.state);
        if state.finished || state.destroyed {
            return;
        }
        state.finished = true;
        self.ended.cancel();

        if let Some(controller) = &state.controller {
            controller.close();
        }
        if let Some(deferred) = state.deferred.take() {
            deferred.resolve();
        }
    }

    /// Resolves once the feed was closed or aborted.
    pub(crate) async fn ended(&self) {
        self.ended.cancelled().await;
    }

    /// Aborts the feed when `signal` fires before the feed ends on its own.
    pub(crate) fn abort_on(&self, signal: CancellationToken) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, streaming body does not follow its abort signal");
            return;
        };

        let feed = self.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = feed.ended() => {}
                () = signal.cancelled() => {
                    trace!("abort signal fired, abort streaming body");
                    feed.abort();
                }
            }
        });
    }

    /// Tears the stream down; the transport observes an aborted body.
    pub(crate) fn abort(&self) {
        let mut state = lock(&self.state);
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.queued.clear();
        self.ended.cancel();

        if let Some(controller) = &state.controller {
            controller.abort();
        }
        if let Some(deferred) = state.deferred.take() {
            deferred.resolve();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body::Body;
    use http_body_util::BodyExt;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[tokio::test]
    async fn replays_queued_chunks_before_later_pushes() {
        let (feed, stream) = StreamFeed::promote([Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        feed.push(Bytes::from_static(b"c"));

        let collector = tokio::spawn(stream.collect());
        tokio::task::yield_now().await;
        feed.push(Bytes::from_static(b"d"));
        feed.close();

        let collected = collector.await.unwrap().unwrap().to_bytes();
        assert_eq!(collected, "abcd");
    }

    #[test]
    fn stays_open_until_closed() {
        let (feed, mut stream) = StreamFeed::promote([Bytes::from_static(b"a")]);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        assert!(matches!(Pin::new(&mut stream).poll_frame(&mut cx), Poll::Ready(Some(Ok(_)))));
        assert!(Pin::new(&mut stream).poll_frame(&mut cx).is_pending());

        feed.close();
        assert!(matches!(Pin::new(&mut stream).poll_frame(&mut cx), Poll::Ready(None)));
    }

    #[test]
    fn abort_before_first_pull_fails_the_stream() {
        let (feed, mut stream) = StreamFeed::promote([Bytes::from_static(b"a")]);
        feed.abort();
        feed.push(Bytes::from_static(b"b"));

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        assert!(matches!(Pin::new(&mut stream).poll_frame(&mut cx), Poll::Ready(Some(Err(BridgeError::Aborted)))));
    }

    #[tokio::test]
    async fn signal_aborts_a_running_feed() {
        let signal = CancellationToken::new();
        let (feed, stream) = StreamFeed::promote([Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        feed.abort_on(signal.clone());

        let collector = tokio::spawn(stream.collect());
        tokio::task::yield_now().await;
        signal.cancel();

        assert!(matches!(collector.await.unwrap(), Err(BridgeError::Aborted)));
        feed.ended().await;
    }

    #[tokio::test]
    async fn closed_feed_ignores_later_signal() {
        let signal = CancellationToken::new();
        let (feed, stream) = StreamFeed::promote([Bytes::from_static(b"a")]);
        feed.abort_on(signal.clone());
        feed.close();
        feed.ended().await;
        signal.cancel();

        assert_eq!(stream.collect().await.unwrap().to_bytes(), "a");
    }
}
