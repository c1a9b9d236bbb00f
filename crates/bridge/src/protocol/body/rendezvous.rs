//! One-shot completion token.
//!
//! A production cycle hands the pulling side a [`Completion`] and keeps the
//! matching [`Deferred`]. The pulling side must not ask for more data until the
//! completion settles, and only resolving (or dropping) the deferred settles it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;

/// Creates a connected deferred/completion pair.
pub fn completion() -> (Deferred, Completion) {
    let (tx, rx) = oneshot::channel();
    (Deferred { tx }, Completion { rx })
}

/// The resolving half. Consumed on use, so it resolves at most once.
#[derive(Debug)]
pub struct Deferred {
    tx: oneshot::Sender<()>,
}

impl Deferred {
    pub fn resolve(self) {
        // the waiting side may already be gone, nothing to resume then
        let _ = self.tx.send(());
    }
}

/// The awaiting half. Settles when its [`Deferred`] is resolved or dropped.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<()>,
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;

    #[test]
    fn settles_only_after_resolve() {
        let (deferred, mut completion) = completion();
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(completion.poll_unpin(&mut cx).is_pending());
        deferred.resolve();
        assert!(completion.poll_unpin(&mut cx).is_ready());
    }

    #[test]
    fn dropped_deferred_settles() {
        let (deferred, mut completion) = completion();
        drop(deferred);
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(completion.poll_unpin(&mut cx).is_ready());
    }
}
