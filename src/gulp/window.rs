use anyhow::{bail, Result};
use std::fmt;

/// Half-open time range `[start, end)` in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    start: f64,
    end: f64,
}

impl TimeWindow {
    /// Builds a window, rejecting non-finite bounds and `start > end`.
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            bail!("time window bounds must be finite (got {start}, {end})");
        }
        if start > end {
            bail!("time window start ({start}) must not exceed end ({end})");
        }
        Ok(Self { start, end })
    }

    /// Zero-width window anchored at `at`.
    pub(crate) fn empty_at(at: f64) -> Self {
        Self { start: at, end: at }
    }

    /// Internal constructor for bounds already known to be ordered.
    pub(crate) fn between(start: f64, end: f64) -> Self {
        debug_assert!(start <= end, "window bounds out of order");
        Self { start, end }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    /// True when `other` lies entirely inside this window.
    pub fn covers(&self, other: &TimeWindow) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn overlaps_or_abuts(&self, other: &TimeWindow) -> bool {
        other.start <= self.end && self.start <= other.end
    }

    /// Union of two windows that overlap or touch; `None` when a gap separates them.
    pub fn union(&self, other: &TimeWindow) -> Option<TimeWindow> {
        if self.overlaps_or_abuts(other) {
            Some(self.span(other))
        } else {
            None
        }
    }

    /// Smallest window containing both, including any gap between them.
    pub fn span(&self, other: &TimeWindow) -> TimeWindow {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
