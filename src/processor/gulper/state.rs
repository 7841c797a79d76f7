use crate::gulp::TimeWindow;

/// Lifecycle of a gulper. `Done` and `Killed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GulperStatus {
    Created,
    Running,
    Done,
    Killed,
}

impl GulperStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GulperStatus::Done | GulperStatus::Killed)
    }
}

/// Mutable progress of one gulper, guarded by the gulper's own mutex.
///
/// `coverage` is always one contiguous window inside `target`. Chunks are
/// planned oldest-to-newest from `coverage.end`; once that suffix is empty,
/// any prefix added by an earlier-reaching extension is back-filled
/// newest-first from `coverage.start` so coverage never splits.
#[derive(Debug, Clone)]
pub(crate) struct GulperState {
    target: TimeWindow,
    coverage: TimeWindow,
    status: GulperStatus,
}

impl GulperState {
    pub(crate) fn new(target: TimeWindow) -> Self {
        Self {
            target,
            coverage: TimeWindow::empty_at(target.start()),
            status: GulperStatus::Created,
        }
    }

    pub(crate) fn target(&self) -> TimeWindow {
        self.target
    }

    pub(crate) fn coverage(&self) -> TimeWindow {
        self.coverage
    }

    pub(crate) fn status(&self) -> GulperStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: GulperStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Widens the target to the hull of itself and `window`. Returns `false`
    /// when nothing changed or the gulper is already terminal.
    pub(crate) fn extend(&mut self, window: TimeWindow) -> bool {
        if self.status.is_terminal() || self.target.covers(&window) {
            return false;
        }

        self.target = self.target.span(&window);
        if self.coverage.is_empty() {
            self.coverage = TimeWindow::empty_at(self.target.start());
        }
        true
    }

    pub(crate) fn next_chunk(&self, gulp_size: f64) -> Option<TimeWindow> {
        if self.coverage.end() < self.target.end() {
            let start = self.coverage.end();
            let end = (start + gulp_size).min(self.target.end());
            return Some(TimeWindow::between(start, end));
        }

        if self.target.start() < self.coverage.start() {
            let end = self.coverage.start();
            let start = (end - gulp_size).max(self.target.start());
            return Some(TimeWindow::between(start, end));
        }

        None
    }

    /// Folds a fetched chunk into coverage. Chunks come from `next_chunk`, so
    /// they touch one edge of the current coverage, unless coverage was still
    /// empty and got re-anchored by an extension while the chunk was in flight.
    pub(crate) fn record_chunk(&mut self, chunk: TimeWindow) {
        if self.coverage.is_empty() {
            self.coverage = chunk;
        } else if chunk.start() == self.coverage.end() {
            self.coverage = TimeWindow::between(self.coverage.start(), chunk.end());
        } else if chunk.end() == self.coverage.start() {
            self.coverage = TimeWindow::between(chunk.start(), self.coverage.end());
        } else {
            tracing::warn!(
                chunk = %chunk,
                coverage = %self.coverage,
                "chunk does not touch coverage; ignoring"
            );
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.coverage.covers(&self.target)
    }
}
