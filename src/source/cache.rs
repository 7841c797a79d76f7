use crate::gulp::{Segment, TimeWindow};
use std::collections::HashMap;
use std::sync::RwLock;

/// Sink for fetched segments. Several gulpers (one per key) write
/// concurrently, so implementations must tolerate parallel `store` calls.
///
/// Storing is fire-and-forget from the gulper's point of view; an
/// implementation that can fail deals with it internally.
pub trait Cache: Send + Sync {
    fn store(&self, channel: &str, segment: &Segment);
}

/// Per-channel totals reported by [`MemoryCache::summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSummary {
    pub channel: String,
    pub segments: usize,
    pub samples: usize,
    pub extent: Option<TimeWindow>,
}

/// Process-local cache keeping every stored segment in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    channels: RwLock<HashMap<String, Vec<Segment>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments for `channel`, ordered by window start.
    pub fn segments(&self, channel: &str) -> Vec<Segment> {
        let guard = self.channels.read().expect("memory cache lock poisoned");
        let mut segments = guard.get(channel).cloned().unwrap_or_default();
        segments.sort_by(|a, b| a.window().start().total_cmp(&b.window().start()));
        segments
    }

    pub fn channels(&self) -> Vec<String> {
        let guard = self.channels.read().expect("memory cache lock poisoned");
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops everything cached and returns how many segments were released.
    pub fn flush(&self) -> usize {
        let mut guard = self.channels.write().expect("memory cache lock poisoned");
        let released = guard.values().map(Vec::len).sum();
        guard.clear();
        tracing::info!(released, "memory cache flushed");
        released
    }

    pub fn summary(&self) -> Vec<CacheSummary> {
        let guard = self.channels.read().expect("memory cache lock poisoned");
        let mut summary: Vec<CacheSummary> = guard
            .iter()
            .map(|(channel, segments)| CacheSummary {
                channel: channel.clone(),
                segments: segments.len(),
                samples: segments.iter().map(Segment::len).sum(),
                extent: segments
                    .iter()
                    .map(Segment::window)
                    .reduce(|acc, window| acc.span(&window)),
            })
            .collect();
        summary.sort_by(|a, b| a.channel.cmp(&b.channel));
        summary
    }
}

impl Cache for MemoryCache {
    fn store(&self, channel: &str, segment: &Segment) {
        let mut guard = self.channels.write().expect("memory cache lock poisoned");
        guard
            .entry(channel.to_owned())
            .or_default()
            .push(segment.clone());
    }
}
