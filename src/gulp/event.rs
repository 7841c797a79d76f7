//! Observer contract between a gulper and whoever asked for the data.
//!
//! Events are delivered from the gulper's own task, never from the caller's.
//! Consumers that need to touch thread-affine state must hand the event off
//! themselves; the usual way is to observe through an unbounded channel.

use super::segment::Segment;
use super::window::TimeWindow;
use anyhow::Error as AnyError;
use tokio::sync::mpsc;

/// Progress notifications emitted by a gulper, in fetch order.
#[derive(Debug)]
pub enum GulpEvent {
    /// One chunk was fetched. `segment` is `None` when the source had no data
    /// for `window` (a gap); coverage still advances past it.
    Chunk {
        channel: String,
        window: TimeWindow,
        segment: Option<Segment>,
        coverage: TimeWindow,
    },
    /// The target window is fully covered.
    Done {
        channel: String,
        coverage: TimeWindow,
    },
    /// The gulper was killed; `coverage` is what was fetched before it stopped.
    Cancelled {
        channel: String,
        coverage: TimeWindow,
    },
    /// Retries were exhausted (or the worker died). Everything inside
    /// `coverage` was already delivered through `Chunk` events.
    Failed {
        channel: String,
        coverage: TimeWindow,
        error: AnyError,
    },
}

impl GulpEvent {
    pub fn channel(&self) -> &str {
        match self {
            GulpEvent::Chunk { channel, .. }
            | GulpEvent::Done { channel, .. }
            | GulpEvent::Cancelled { channel, .. }
            | GulpEvent::Failed { channel, .. } => channel,
        }
    }

    pub fn coverage(&self) -> TimeWindow {
        match self {
            GulpEvent::Chunk { coverage, .. }
            | GulpEvent::Done { coverage, .. }
            | GulpEvent::Cancelled { coverage, .. }
            | GulpEvent::Failed { coverage, .. } => *coverage,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GulpEvent::Chunk { .. })
    }
}

pub trait GulpObserver: Send + Sync {
    fn on_event(&self, event: GulpEvent);
}

impl GulpObserver for mpsc::UnboundedSender<GulpEvent> {
    fn on_event(&self, event: GulpEvent) {
        if self.send(event).is_err() {
            tracing::trace!("gulp observer channel closed; dropping event");
        }
    }
}

/// Adapts a closure into a [`GulpObserver`].
pub struct CallbackObserver<F> {
    callback: F,
}

impl<F> CallbackObserver<F>
where
    F: Fn(GulpEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> GulpObserver for CallbackObserver<F>
where
    F: Fn(GulpEvent) + Send + Sync,
{
    fn on_event(&self, event: GulpEvent) {
        (self.callback)(event)
    }
}
