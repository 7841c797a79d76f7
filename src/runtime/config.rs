use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

/// Widest window, in seconds, requested from a data source in one call.
/// Requests narrower than this are fetched inline without a gulper.
pub const GULP_SIZE: f64 = 1800.0;

const DEFAULT_FETCH_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Runtime configuration for a [`crate::GulperRegistry`].
///
/// Instances are only produced by [`GulpConfig::builder`] or [`GulpConfig::new`],
/// both of which validate before returning.
#[derive(Debug, Clone, PartialEq)]
pub struct GulpConfig {
    gulp_size: f64,
    fetch_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_concurrent_fetches: usize,
    metrics_interval: Duration,
}

pub struct GulpConfigParams {
    pub gulp_size: f64,
    pub fetch_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_concurrent_fetches: usize,
    pub metrics_interval: Duration,
}

impl Default for GulpConfig {
    fn default() -> Self {
        Self {
            gulp_size: GULP_SIZE,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

impl GulpConfig {
    pub fn builder() -> GulpConfigBuilder {
        GulpConfigBuilder::default()
    }

    pub fn new(params: GulpConfigParams) -> Result<Self> {
        let GulpConfigParams {
            gulp_size,
            fetch_attempts,
            initial_backoff,
            max_backoff,
            max_concurrent_fetches,
            metrics_interval,
        } = params;

        let config = Self {
            gulp_size,
            fetch_attempts,
            initial_backoff,
            max_backoff,
            max_concurrent_fetches,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Chunk width in seconds; also the inline-fetch threshold.
    pub fn gulp_size(&self) -> f64 {
        self.gulp_size
    }

    /// Total attempts per chunk, first try included.
    pub fn fetch_attempts(&self) -> usize {
        self.fetch_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Upper bound on chunk fetches in flight across all gulpers.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gulp_size.is_finite() || self.gulp_size <= 0.0 {
            bail!("gulp_size must be a positive number of seconds");
        }

        if self.fetch_attempts == 0 {
            bail!("fetch_attempts must be greater than 0");
        }

        if self.max_backoff < self.initial_backoff {
            bail!(
                "max_backoff ({:?}) must not be shorter than initial_backoff ({:?})",
                self.max_backoff,
                self.initial_backoff
            );
        }

        if self.max_concurrent_fetches == 0 {
            bail!("max_concurrent_fetches must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct GulpConfigBuilder {
    gulp_size: Option<f64>,
    fetch_attempts: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    max_concurrent_fetches: Option<usize>,
    metrics_interval: Option<Duration>,
}

impl GulpConfigBuilder {
    pub fn gulp_size(mut self, seconds: f64) -> Self {
        self.gulp_size = Some(seconds);
        self
    }

    pub fn fetch_attempts(mut self, attempts: usize) -> Self {
        self.fetch_attempts = Some(attempts);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn max_concurrent_fetches(mut self, fetches: usize) -> Self {
        self.max_concurrent_fetches = Some(fetches);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<GulpConfig> {
        let defaults = GulpConfig::default();
        GulpConfig::new(GulpConfigParams {
            gulp_size: self.gulp_size.unwrap_or(defaults.gulp_size),
            fetch_attempts: self.fetch_attempts.unwrap_or(defaults.fetch_attempts),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            max_concurrent_fetches: self
                .max_concurrent_fetches
                .unwrap_or(defaults.max_concurrent_fetches),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
        })
    }
}
