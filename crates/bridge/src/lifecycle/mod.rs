//! Message lifecycle: phases, cancellation, timers and events.
//!
//! - [`Lifecycle`]: the once-only flags and phase of an outgoing message
//! - [`AbortCoordinator`]: abort signal, timer and the single-shot `Abort` / `Close` latches
//! - [`MessageEvent`] / [`ServerEvent`]: what messages and servers report, through
//!   an [`EventSink`] to an [`Events`] receiver

mod abort;
mod event;
mod state;

pub use abort::AbortCoordinator;
pub use event::{EventSink, Events, MessageEvent, ServerEvent, events};
pub use state::{Lifecycle, Phase};
