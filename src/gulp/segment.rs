use super::window::TimeWindow;

/// Block of samples returned by a data source for one window of one channel.
///
/// The payload is opaque to the gulping core; it is forwarded to the cache and
/// the observer untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    window: TimeWindow,
    sample_rate: f64,
    samples: Vec<i32>,
}

impl Segment {
    pub fn new(window: TimeWindow, sample_rate: f64, samples: Vec<i32>) -> Self {
        Self {
            window,
            sample_rate,
            samples,
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
