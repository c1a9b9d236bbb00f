use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lifecycle::event::{EventSink, MessageEvent};
use crate::protocol::BridgeError;
use crate::utils::lock;

struct Inner {
    signal: CancellationToken,
    closed_signal: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    abort_emitted: AtomicBool,
    timed_out: AtomicBool,
    events: EventSink<MessageEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(timer) = timer.take() {
            timer.abort();
        }
    }
}

/// Coordinates the independent ways a message can end.
///
/// Owns the message's abort signal, its timer and the latches that make
/// `Abort` and `Close` single-shot. Clones share the same state.
#[derive(Clone)]
pub struct AbortCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for AbortCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortCoordinator")
            .field("aborted", &self.is_aborted())
            .field("timed_out", &self.is_timed_out())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl AbortCoordinator {
    pub fn new(events: EventSink<MessageEvent>) -> Self {
        Self::with_signal(CancellationToken::new(), events)
    }

    /// Creates a coordinator whose signal is also cancelled by `parent`.
    pub fn linked(parent: &CancellationToken, events: EventSink<MessageEvent>) -> Self {
        Self::with_signal(parent.child_token(), events)
    }

    fn with_signal(signal: CancellationToken, events: EventSink<MessageEvent>) -> Self {
        let inner = Inner {
            signal,
            closed_signal: CancellationToken::new(),
            timer: Mutex::new(None),
            closed: AtomicBool::new(false),
            abort_emitted: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            events,
        };
        Self { inner: Arc::new(inner) }
    }

    /// The abort signal, cancelled on abort and on timeout.
    pub fn signal(&self) -> CancellationToken {
        self.inner.signal.clone()
    }

    pub fn events(&self) -> &EventSink<MessageEvent> {
        &self.inner.events
    }

    pub fn emit(&self, event: MessageEvent) {
        self.inner.events.emit(event);
    }

    /// Arms the timer. `ms == 0` disarms it; a new duration replaces the
    /// running timer. On expiry the abort signal is cancelled and `Timeout` is
    /// emitted, the message itself is left alone.
    pub fn set_timeout(&self, ms: u64) {
        self.clear_timeout();
        if ms == 0 {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(ms, "no async runtime, timeout not armed");
            return;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!(ms, "message timed out");
            inner.timed_out.store(true, Ordering::SeqCst);
            inner.signal.cancel();
            inner.events.emit(MessageEvent::Timeout);
        });

        *lock(&self.inner.timer) = Some(timer);
    }

    pub fn clear_timeout(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
    }

    /// Cancels the abort signal. Returns true if this call cancelled it.
    pub fn abort(&self) -> bool {
        if self.inner.signal.is_cancelled() {
            return false;
        }
        self.inner.signal.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.signal.is_cancelled()
    }

    pub fn is_timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::SeqCst)
    }

    /// The error that describes why the signal was cancelled.
    pub fn cancel_error(&self) -> BridgeError {
        if self.is_timed_out() { BridgeError::TimedOut } else { BridgeError::Aborted }
    }

    /// Emits `Abort` the first time only.
    pub fn emit_abort(&self) -> bool {
        if self.inner.abort_emitted.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.emit(MessageEvent::Abort);
        true
    }

    /// Emits `Close` the first time only, disarming the timer.
    pub fn emit_close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.clear_timeout();
        self.emit(MessageEvent::Close);
        self.inner.closed_signal.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once `Close` was emitted.
    pub async fn closed(&self) {
        self.inner.closed_signal.cancelled().await;
    }
}
