use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures::FutureExt;
use http_body::{Body, Frame, SizeHint};
use tracing::{error, trace};

use crate::protocol::body::rendezvous::Completion;
use crate::protocol::{BridgeError, PayloadSize, TransportError};
use crate::utils::lock;

/// The production callback of a [`DirectStream`].
///
/// Invoked by the stream whenever the transport wants bytes and nothing is
/// queued. The callback writes what it has into the controller and returns
/// `Some(completion)` to suspend further pulls until the completion settles.
pub trait Produce: Send + 'static {
    fn pull(&mut self, controller: &Controller) -> Result<Option<Completion>, BridgeError>;
}

impl<F> Produce for F
where
    F: FnMut(&Controller) -> Result<Option<Completion>, BridgeError> + Send + 'static,
{
    fn pull(&mut self, controller: &Controller) -> Result<Option<Completion>, BridgeError> {
        self(controller)
    }
}

#[derive(Debug, Default)]
struct StreamState {
    queue: VecDeque<Bytes>,
    closed: bool,
    aborted: bool,
    waker: Option<Waker>,
}

/// Write side handle of a [`DirectStream`].
///
/// Cloneable so the producer can keep it beyond a single pull and keep writing
/// directly while the transport drains.
#[derive(Clone)]
pub struct Controller {
    state: Arc<Mutex<StreamState>>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Controller").field("queued", &state.queue.len()).field("closed", &state.closed).field("aborted", &state.aborted).finish()
    }
}

impl Controller {
    fn new() -> Self {
        Self { state: Arc::new(Mutex::new(StreamState::default())) }
    }

    fn update<R>(&self, f: impl FnOnce(&mut StreamState) -> R) -> R {
        let (result, waker) = {
            let mut state = lock(&self.state);
            let result = f(&mut state);
            (result, state.waker.take())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        result
    }

    /// Queues a chunk for the transport. Returns false if the stream no longer
    /// accepts data.
    pub fn write(&self, chunk: Bytes) -> bool {
        self.update(|state| {
            if state.closed || state.aborted {
                trace!(size = chunk.len(), "discard chunk written to a closed body stream");
                return false;
            }
            if !chunk.is_empty() {
                state.queue.push_back(chunk);
            }
            true
        })
    }

    /// Ends the stream once the queued chunks are drained.
    pub fn close(&self) {
        self.update(|state| state.closed = true);
    }

    /// Aborts the stream, dropping anything still queued.
    pub fn abort(&self) {
        self.update(|state| {
            state.aborted = true;
            state.queue.clear();
        });
    }

    pub fn is_closed(&self) -> bool {
        let state = lock(&self.state);
        state.closed || state.aborted
    }
}

type ErrorHook = Box<dyn FnOnce(BridgeError) + Send>;

/// Pull-based body handed to a transport.
///
/// The transport polls it like any `http_body::Body`. Queued chunks are
/// delivered first; when the queue is empty the producer is invoked, unless the
/// completion it returned last time has not settled yet. That completion is
/// the only backpressure signal: a producer is never invoked twice within one
/// production cycle.
pub struct DirectStream {
    producer: Box<dyn Produce>,
    controller: Controller,
    pending: Option<Completion>,
    on_error: Option<ErrorHook>,
    done: bool,
}

impl fmt::Debug for DirectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectStream")
            .field("controller", &self.controller)
            .field("pending", &self.pending.is_some())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl DirectStream {
    pub fn new<P: Produce>(producer: P) -> Self {
        Self { producer: Box::new(producer), controller: Controller::new(), pending: None, on_error: None, done: false }
    }

    /// Registers a hook receiving the producer's error, if it ever fails.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(BridgeError) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Returns a handle to the stream's controller.
    pub fn controller(&self) -> Controller {
        self.controller.clone()
    }

    fn fail(&mut self, e: BridgeError) -> BridgeError {
        error!(cause = %e, "body producer failed, abort body stream");
        self.done = true;
        self.controller.abort();
        let reason = e.to_string();
        if let Some(hook) = self.on_error.take() {
            hook(e);
        }
        TransportError::body(reason).into()
    }
}

impl Body for DirectStream {
    type Data = Bytes;
    type Error = BridgeError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let mut pulled = false;
        loop {
            {
                let mut state = lock(&this.controller.state);
                if state.aborted {
                    this.done = true;
                    return Poll::Ready(Some(Err(BridgeError::Aborted)));
                }
                if let Some(chunk) = state.queue.pop_front() {
                    return Poll::Ready(Some(Ok(Frame::data(chunk))));
                }
                if state.closed {
                    this.done = true;
                    return Poll::Ready(None);
                }
                state.waker = Some(cx.waker().clone());
            }

            if let Some(pending) = &mut this.pending {
                if pending.poll_unpin(cx).is_pending() {
                    return Poll::Pending;
                }
                this.pending = None;
                continue;
            }

            // the producer ran without queueing, closing or suspending: wait
            // for the next direct write instead of spinning
            if pulled {
                return Poll::Pending;
            }

            match this.producer.pull(&this.controller) {
                Ok(completion) => {
                    this.pending = completion;
                    pulled = true;
                }
                Err(e) => return Poll::Ready(Some(Err(this.fail(e)))),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        PayloadSize::Chunked.into()
    }
}

impl Drop for DirectStream {
    fn drop(&mut self) {
        if !self.done {
            // the transport went away: stop accepting writes
            self.controller.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::rendezvous::{Deferred, completion};
    use futures::task::noop_waker_ref;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn poll(stream: &mut DirectStream) -> Poll<Option<Result<Frame<Bytes>, BridgeError>>> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(stream).poll_frame(&mut cx)
    }

    fn data(poll: Poll<Option<Result<Frame<Bytes>, BridgeError>>>) -> Bytes {
        match poll {
            Poll::Ready(Some(Ok(frame))) => frame.into_data().expect("expected data frame"),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn producer_waits_for_completion() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let deferred: Arc<Mutex<Option<Deferred>>> = Arc::default();

        let mut stream = {
            let pulls = Arc::clone(&pulls);
            let deferred = Arc::clone(&deferred);
            DirectStream::new(move |controller: &Controller| {
                let n = pulls.fetch_add(1, Ordering::SeqCst);
                controller.write(Bytes::from(format!("chunk-{n}")));
                let (tx, rx) = completion();
                *deferred.lock().unwrap() = Some(tx);
                Ok(Some(rx))
            })
        };

        assert_eq!(data(poll(&mut stream)), "chunk-0");
        assert!(poll(&mut stream).is_pending());
        assert!(poll(&mut stream).is_pending());
        assert_eq!(pulls.load(Ordering::SeqCst), 1);

        deferred.lock().unwrap().take().unwrap().resolve();
        assert_eq!(data(poll(&mut stream)), "chunk-1");
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn direct_writes_drain_while_suspended() {
        let controller_slot: Arc<Mutex<Option<Controller>>> = Arc::default();
        let keep: Arc<Mutex<Vec<Deferred>>> = Arc::default();

        let mut stream = {
            let slot = Arc::clone(&controller_slot);
            let keep = Arc::clone(&keep);
            DirectStream::new(move |controller: &Controller| {
                *slot.lock().unwrap() = Some(controller.clone());
                let (tx, rx) = completion();
                keep.lock().unwrap().push(tx);
                Ok(Some(rx))
            })
        };

        assert!(poll(&mut stream).is_pending());
        let controller = controller_slot.lock().unwrap().clone().unwrap();
        controller.write(Bytes::from_static(b"a"));
        controller.write(Bytes::from_static(b"b"));
        assert_eq!(data(poll(&mut stream)), "a");
        assert_eq!(data(poll(&mut stream)), "b");

        controller.close();
        assert!(matches!(poll(&mut stream), Poll::Ready(None)));
        assert!(!controller.write(Bytes::from_static(b"late")));
        assert_eq!(keep.lock().unwrap().len(), 1);
    }

    #[test]
    fn producer_failure_aborts_stream_and_reports() {
        let reported: Arc<Mutex<Option<String>>> = Arc::default();
        let mut stream = {
            let reported = Arc::clone(&reported);
            DirectStream::new(|_controller: &Controller| Err(BridgeError::TimedOut))
                .on_error(move |e| *reported.lock().unwrap() = Some(e.to_string()))
        };

        assert!(matches!(poll(&mut stream), Poll::Ready(Some(Err(BridgeError::Transport { .. })))));
        assert!(matches!(poll(&mut stream), Poll::Ready(None)));
        assert_eq!(reported.lock().unwrap().as_deref(), Some("the operation timed out"));
    }

    #[test]
    fn idle_producer_does_not_spin() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let mut stream = {
            let pulls = Arc::clone(&pulls);
            DirectStream::new(move |_controller: &Controller| {
                pulls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        };

        assert!(poll(&mut stream).is_pending());
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
        stream.controller().write(Bytes::from_static(b"x"));
        assert_eq!(data(poll(&mut stream)), "x");
    }
}
