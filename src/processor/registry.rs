//! Registry of live gulpers, keyed by source and channel.
//!
//! The registry is the only way to create, extend, or cancel fetch activity.
//! It guarantees at most one live gulper per key: the create-or-route
//! decision in [`GulperRegistry::request`] and every removal happen under a
//! single mutex, and gulpers take the same mutex when they decide to finish.
//! Gulper-internal state has its own lock, always acquired after this one.

use crate::gulp::{GulpKey, GulpObserver, Segment, TimeWindow};
use crate::processor::gulper::{Gulper, GulperHandle, GulperParams};
use crate::runtime::config::GulpConfig;
use crate::runtime::telemetry::{self, Telemetry};
use crate::source::{Cache, DataSource};
use anyhow::{bail, Context, Result};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A caller's ask for `window` of `channel` from `source`, deduplicated on `key`.
pub struct GulpRequest {
    pub key: GulpKey,
    pub observer: Arc<dyn GulpObserver>,
    pub source: Arc<dyn DataSource>,
    pub channel: String,
    pub window: TimeWindow,
}

impl GulpRequest {
    /// Builds a request keyed on the source's id and `channel`.
    pub fn new(
        observer: Arc<dyn GulpObserver>,
        source: Arc<dyn DataSource>,
        channel: impl Into<String>,
        t1: f64,
        t2: f64,
    ) -> Result<Self> {
        let channel = channel.into();
        let window = TimeWindow::new(t1, t2)
            .with_context(|| format!("invalid request window for {channel}"))?;
        Ok(Self {
            key: GulpKey::new(source.id(), channel.clone()),
            observer,
            source,
            channel,
            window,
        })
    }

    /// Overrides the deduplication key.
    pub fn with_key(mut self, key: GulpKey) -> Self {
        self.key = key;
        self
    }
}

/// How the registry served a request.
#[derive(Debug)]
pub enum GulpResponse {
    /// Window narrower than one chunk, fetched on the caller's task. No
    /// gulper was created. `None` means the source had no data.
    Inline(Option<Segment>),
    /// A new gulper was registered and started.
    Started(GulperHandle),
    /// A live gulper already owned the key; its target was widened as needed.
    /// The request's observer is not attached: the first observer wins.
    Extended(GulperHandle),
}

impl GulpResponse {
    pub fn handle(&self) -> Option<&GulperHandle> {
        match self {
            GulpResponse::Inline(_) => None,
            GulpResponse::Started(handle) | GulpResponse::Extended(handle) => Some(handle),
        }
    }
}

pub(crate) struct RegistryInner {
    pub(crate) config: GulpConfig,
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) fetch_permits: Semaphore,
    gulpers: Mutex<HashMap<GulpKey, Arc<Gulper>>>,
    shutdown_root: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

impl RegistryInner {
    pub(crate) fn lock_gulpers(&self) -> MutexGuard<'_, HashMap<GulpKey, Arc<Gulper>>> {
        self.gulpers.lock().expect("gulper registry mutex poisoned")
    }

    /// Drops `gulper`'s entry if it is still the registered occupant of its
    /// key. A newer gulper under the same key is left alone.
    pub(crate) fn remove(
        &self,
        gulpers: &mut HashMap<GulpKey, Arc<Gulper>>,
        gulper: &Gulper,
    ) -> bool {
        let is_current = gulpers
            .get(gulper.key())
            .is_some_and(|current| current.id() == gulper.id());

        if is_current {
            gulpers.remove(gulper.key());
            tracing::debug!(key = %gulper.key(), id = gulper.id(), "gulper deregistered");
        } else {
            tracing::debug!(
                key = %gulper.key(),
                id = gulper.id(),
                "ignoring stale gulper removal"
            );
        }
        is_current
    }
}

/// Owner of all gulping activity. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct GulperRegistry {
    inner: Arc<RegistryInner>,
}

impl GulperRegistry {
    pub fn new(config: GulpConfig, cache: Arc<dyn Cache>) -> Self {
        Self::with_cancellation_token(config, cache, CancellationToken::new())
    }

    /// Every gulper's cancellation token is a child of `shutdown`, so
    /// cancelling it kills all of them.
    pub fn with_cancellation_token(
        config: GulpConfig,
        cache: Arc<dyn Cache>,
        shutdown: CancellationToken,
    ) -> Self {
        debug_assert!(
            config.validate().is_ok(),
            "GulpConfig should have been validated at construction time"
        );
        let fetch_permits = Semaphore::new(config.max_concurrent_fetches());

        Self {
            inner: Arc::new(RegistryInner {
                config,
                cache,
                telemetry: Arc::new(Telemetry::default()),
                fetch_permits,
                gulpers: Mutex::new(HashMap::new()),
                shutdown_root: shutdown,
                tracker: TaskTracker::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &GulpConfig {
        &self.inner.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.inner.telemetry.clone()
    }

    /// Routes a request to the live gulper for its key, fetches it inline
    /// when it is narrower than one chunk, or starts a new gulper.
    ///
    /// The inline path blocks this task for one source call.
    pub async fn request(&self, request: GulpRequest) -> Result<GulpResponse> {
        let GulpRequest {
            key,
            observer,
            source,
            channel,
            window,
        } = request;

        {
            let mut gulpers = self.inner.lock_gulpers();
            if self.inner.shutdown_root.is_cancelled() {
                bail!("gulper registry is shut down");
            }

            // Extending under the map lock keeps the gulper from finishing
            // between the lookup and the extension.
            if let Some(existing) = gulpers.get(&key) {
                let handle = self.route_to_existing(existing.clone(), &observer, window);
                return Ok(GulpResponse::Extended(handle));
            }

            if window.width() >= self.inner.config.gulp_size() {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let gulper = Arc::new(Gulper::new(GulperParams {
                    id,
                    key: key.clone(),
                    channel,
                    source,
                    observer,
                    target: window,
                    cancel: self.inner.shutdown_root.child_token(),
                }));
                gulpers.insert(key, gulper.clone());
                self.spawn_gulper(gulper.clone());
                self.inner.telemetry.record_gulper_started();
                return Ok(GulpResponse::Started(GulperHandle::new(gulper)));
            }
        }

        let segment = self.fetch_inline(source.as_ref(), &channel, window).await?;
        Ok(GulpResponse::Inline(segment))
    }

    /// Signals cooperative cancellation to the live gulper for `key`.
    /// Returns `false` when no gulper owns the key.
    pub fn kill(&self, key: &GulpKey) -> bool {
        let gulpers = self.inner.lock_gulpers();
        match gulpers.get(key) {
            Some(gulper) => {
                gulper.kill();
                true
            }
            None => {
                tracing::debug!(key = %key, "kill requested for key without a live gulper");
                false
            }
        }
    }

    pub fn get(&self, key: &GulpKey) -> Option<GulperHandle> {
        self.inner
            .lock_gulpers()
            .get(key)
            .cloned()
            .map(GulperHandle::new)
    }

    pub fn active_keys(&self) -> Vec<GulpKey> {
        let mut keys: Vec<GulpKey> = self.inner.lock_gulpers().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.lock_gulpers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically logs telemetry until the registry shuts down.
    pub fn spawn_metrics_reporter(&self) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        telemetry::spawn_metrics_reporter(
            self.inner.telemetry.clone(),
            move || {
                inner
                    .upgrade()
                    .map(|inner| inner.lock_gulpers().len())
                    .unwrap_or(0)
            },
            self.inner.shutdown_root.child_token(),
            self.inner.config.metrics_interval(),
        )
    }

    /// Kills every gulper, refuses new requests, and waits for all gulper
    /// tasks to exit.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.len(), "shutting down gulper registry");
        {
            let _gulpers = self.inner.lock_gulpers();
            self.inner.shutdown_root.cancel();
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::debug!("gulper registry shutdown complete");
    }

    fn route_to_existing(
        &self,
        gulper: Arc<Gulper>,
        observer: &Arc<dyn GulpObserver>,
        window: TimeWindow,
    ) -> GulperHandle {
        if gulper.extend(window) {
            self.inner.telemetry.record_extension();
            tracing::info!(
                key = %gulper.key(),
                requested = %window,
                window = %gulper.target(),
                "extended live gulper"
            );
        } else {
            tracing::debug!(
                key = %gulper.key(),
                requested = %window,
                "request already covered by live gulper"
            );
        }
        if !gulper.has_observer(observer) {
            tracing::debug!(key = %gulper.key(), "live gulper keeps its first observer");
        }
        GulperHandle::new(gulper)
    }

    fn spawn_gulper(&self, gulper: Arc<Gulper>) {
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let result = std::panic::AssertUnwindSafe(gulper.clone().run(inner.clone()))
                .catch_unwind()
                .await;

            if let Err(panic_payload) = result {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(
                    key = %gulper.key(),
                    panic = %panic_msg,
                    "gulper task panicked"
                );
                gulper.abandon(panic_msg, &inner);
            }
        });
    }

    async fn fetch_inline(
        &self,
        source: &dyn DataSource,
        channel: &str,
        window: TimeWindow,
    ) -> Result<Option<Segment>> {
        tracing::debug!(channel, window = %window, "fetching window inline");
        self.inner.telemetry.record_inline_fetch();

        let segment = source
            .fetch(channel, window)
            .await
            .with_context(|| format!("inline fetch of {window} for {channel} failed"))?;

        if let Some(segment) = &segment {
            self.inner.cache.store(channel, segment);
        }
        Ok(segment)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
