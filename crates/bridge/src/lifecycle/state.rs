use crate::ensure;
use crate::protocol::StateError;

/// Where an outgoing message is in its life.
///
/// `Idle → HeadersPending → (Buffering | Streaming) → Finished`. The fast path
/// may go straight from `Idle` or `HeadersPending` to `Finished`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    HeadersPending,
    Buffering,
    Streaming,
    Finished,
}

/// State machine of an outgoing message.
///
/// `headers_sent` and `finished` only ever go from false to true. The
/// `aborted` and `timed_out` flags are orthogonal to the phase; aborting
/// forces the phase to `Finished`.
#[derive(Debug, Default)]
pub struct Lifecycle {
    phase: Phase,
    headers_sent: bool,
    finished: bool,
    aborted: bool,
    timed_out: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn ensure_headers_mutable(&self) -> Result<(), StateError> {
        ensure!(!self.headers_sent, StateError::HeadersSent);
        Ok(())
    }

    pub fn ensure_writable(&self) -> Result<(), StateError> {
        ensure!(!self.finished, StateError::WriteAfterFinish);
        Ok(())
    }

    pub fn ensure_finishable(&self) -> Result<(), StateError> {
        ensure!(!self.finished, StateError::AlreadyFinished);
        Ok(())
    }

    /// An explicit header block was staged but not sent yet.
    pub fn stage_headers(&mut self) -> Result<(), StateError> {
        self.ensure_headers_mutable()?;
        if self.phase == Phase::Idle {
            self.phase = Phase::HeadersPending;
        }
        Ok(())
    }

    /// The first chunk is held in memory.
    pub fn buffer(&mut self) {
        if matches!(self.phase, Phase::Idle | Phase::HeadersPending) {
            self.phase = Phase::Buffering;
        }
    }

    /// The body was promoted: the head is out, chunks now stream.
    pub fn stream(&mut self) {
        if self.phase != Phase::Finished {
            self.phase = Phase::Streaming;
        }
        self.headers_sent = true;
    }

    /// Returns true on the transition, false if the headers were already sent.
    pub fn send_headers(&mut self) -> bool {
        !std::mem::replace(&mut self.headers_sent, true)
    }

    /// Returns true on the transition, false if already finished.
    pub fn finish(&mut self) -> bool {
        self.phase = Phase::Finished;
        !std::mem::replace(&mut self.finished, true)
    }

    /// Sets the aborted flag and forces the terminal phase. Returns true the
    /// first time only.
    pub fn abort(&mut self) -> bool {
        if self.aborted {
            return false;
        }
        self.aborted = true;
        self.phase = Phase::Finished;
        true
    }

    /// Returns true the first time only.
    pub fn time_out(&mut self) -> bool {
        !std::mem::replace(&mut self.timed_out, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffering_then_streaming() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.stage_headers().unwrap();
        assert_eq!(lifecycle.phase(), Phase::HeadersPending);

        lifecycle.buffer();
        assert_eq!(lifecycle.phase(), Phase::Buffering);
        assert!(!lifecycle.headers_sent());

        lifecycle.stream();
        assert_eq!(lifecycle.phase(), Phase::Streaming);
        assert!(lifecycle.headers_sent());
        assert_eq!(lifecycle.stage_headers(), Err(StateError::HeadersSent));
    }

    #[test]
    fn flags_flip_exactly_once() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.send_headers());
        assert!(!lifecycle.send_headers());
        assert!(lifecycle.finish());
        assert!(!lifecycle.finish());
        assert!(lifecycle.headers_sent());
        assert_eq!(lifecycle.ensure_writable(), Err(StateError::WriteAfterFinish));
        assert_eq!(lifecycle.ensure_finishable(), Err(StateError::AlreadyFinished));
    }

    #[test]
    fn abort_forces_terminal_phase() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.buffer();
        assert!(lifecycle.abort());
        assert!(!lifecycle.abort());
        assert_eq!(lifecycle.phase(), Phase::Finished);
        assert!(lifecycle.is_aborted());
        assert!(!lifecycle.is_finished());
    }
}
