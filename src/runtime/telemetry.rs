use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Filter applied when `RUST_LOG` is unset: this crate at `info`, everything
/// else at `warn`.
const DEFAULT_LOG_FILTER: &str = "warn,wavegulp=info";

static TRACING_READY: OnceLock<()> = OnceLock::new();

/// Installs a fmt subscriber filtered by `RUST_LOG`, or by `warn,wavegulp=info`
/// when it is unset.
///
/// Safe to call repeatedly and alongside a subscriber installed elsewhere.
pub fn init_tracing() {
    TRACING_READY.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok();
        if !installed {
            tracing::debug!("global tracing subscriber already set; keeping it");
        }
    });
}

/// Counters shared by the registry and every gulper it spawns.
#[derive(Default, Debug)]
pub struct Telemetry {
    gulpers_started: AtomicU64,
    gulpers_completed: AtomicU64,
    gulpers_cancelled: AtomicU64,
    gulpers_failed: AtomicU64,
    extensions: AtomicU64,
    inline_fetches: AtomicU64,
    chunks_fetched: AtomicU64,
    data_gaps: AtomicU64,
    source_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_gulper_started(&self) {
        self.gulpers_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gulper_completed(&self) {
        self.gulpers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gulper_cancelled(&self) {
        self.gulpers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gulper_failed(&self) {
        self.gulpers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extension(&self) {
        self.extensions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inline_fetch(&self) {
        self.inline_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a fetched chunk; gaps are tracked separately as well.
    pub fn record_chunk(&self, gap: bool) {
        self.chunks_fetched.fetch_add(1, Ordering::Relaxed);
        if gap {
            self.data_gaps.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            gulpers_started: self.gulpers_started.load(Ordering::Relaxed),
            gulpers_completed: self.gulpers_completed.load(Ordering::Relaxed),
            gulpers_cancelled: self.gulpers_cancelled.load(Ordering::Relaxed),
            gulpers_failed: self.gulpers_failed.load(Ordering::Relaxed),
            extensions: self.extensions.load(Ordering::Relaxed),
            inline_fetches: self.inline_fetches.load(Ordering::Relaxed),
            chunks_fetched: self.chunks_fetched.load(Ordering::Relaxed),
            data_gaps: self.data_gaps.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub gulpers_started: u64,
    pub gulpers_completed: u64,
    pub gulpers_cancelled: u64,
    pub gulpers_failed: u64,
    pub extensions: u64,
    pub inline_fetches: u64,
    pub chunks_fetched: u64,
    pub data_gaps: u64,
    pub source_errors: u64,
}

impl TelemetrySnapshot {
    /// Gulpers started but not yet finished in any way.
    pub fn gulpers_in_flight(&self) -> u64 {
        self.gulpers_started.saturating_sub(
            self.gulpers_completed + self.gulpers_cancelled + self.gulpers_failed,
        )
    }

    /// Activity between `earlier` and this snapshot.
    pub fn since(&self, earlier: &TelemetrySnapshot) -> IntervalActivity {
        IntervalActivity {
            chunks: self.chunks_fetched.saturating_sub(earlier.chunks_fetched),
            data_gaps: self.data_gaps.saturating_sub(earlier.data_gaps),
            inline_fetches: self.inline_fetches.saturating_sub(earlier.inline_fetches),
            source_errors: self.source_errors.saturating_sub(earlier.source_errors),
            extensions: self.extensions.saturating_sub(earlier.extensions),
        }
    }
}

/// Counter deltas over one reporting interval.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IntervalActivity {
    pub chunks: u64,
    pub data_gaps: u64,
    pub inline_fetches: u64,
    pub source_errors: u64,
    pub extensions: u64,
}

impl IntervalActivity {
    pub fn chunks_per_sec(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            0.0
        } else {
            self.chunks as f64 / secs
        }
    }
}

/// Logs one line per `interval` on target `wavegulp::metrics` until `shutdown`
/// fires. `active_gulpers` is sampled at each tick.
pub fn spawn_metrics_reporter<F>(
    telemetry: Arc<Telemetry>,
    active_gulpers: F,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut previous = (Instant::now(), telemetry.snapshot());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let snapshot = telemetry.snapshot();
            let activity = snapshot.since(&previous.1);

            tracing::info!(
                target: "wavegulp::metrics",
                active_gulpers = active_gulpers(),
                in_flight = snapshot.gulpers_in_flight(),
                chunks_per_sec = format!("{:.2}", activity.chunks_per_sec(now - previous.0)),
                chunks = activity.chunks,
                data_gaps = activity.data_gaps,
                inline_fetches = activity.inline_fetches,
                extensions = activity.extensions,
                source_errors = activity.source_errors,
                failed_total = snapshot.gulpers_failed,
                "gulp activity"
            );
            previous = (now, snapshot);
        }

        tracing::debug!(target: "wavegulp::metrics", "metrics reporter stopped");
    })
}
