use crate::gulp::{GulpEvent, GulpKey, GulpObserver, Segment, TimeWindow};
use crate::processor::backoff::{retry_with_backoff, RetryCancelled, RetryDisposition, RetryPolicy};
use crate::processor::registry::RegistryInner;
use crate::source::{DataSource, SourceError};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::GulpError;
use super::state::{GulperState, GulperStatus};

/// Fetches one key's target window in bounded chunks on its own task.
///
/// Only the registry creates gulpers, and a gulper always deregisters itself
/// when it reaches a terminal status.
pub(crate) struct Gulper {
    id: u64,
    key: GulpKey,
    channel: String,
    source: Arc<dyn DataSource>,
    observer: Arc<dyn GulpObserver>,
    state: Mutex<GulperState>,
    cancel: CancellationToken,
    status_tx: watch::Sender<GulperStatus>,
}

pub(crate) struct GulperParams {
    pub id: u64,
    pub key: GulpKey,
    pub channel: String,
    pub source: Arc<dyn DataSource>,
    pub observer: Arc<dyn GulpObserver>,
    pub target: TimeWindow,
    pub cancel: CancellationToken,
}

enum Step {
    Fetch(TimeWindow),
    Finished(GulperStatus),
}

impl Gulper {
    pub(crate) fn new(params: GulperParams) -> Self {
        let GulperParams {
            id,
            key,
            channel,
            source,
            observer,
            target,
            cancel,
        } = params;
        let (status_tx, _) = watch::channel(GulperStatus::Created);

        Self {
            id,
            key,
            channel,
            source,
            observer,
            state: Mutex::new(GulperState::new(target)),
            cancel,
            status_tx,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key(&self) -> &GulpKey {
        &self.key
    }

    pub(crate) fn target(&self) -> TimeWindow {
        self.lock_state().target()
    }

    pub(crate) fn coverage(&self) -> TimeWindow {
        self.lock_state().coverage()
    }

    pub(crate) fn status(&self) -> GulperStatus {
        self.lock_state().status()
    }

    pub(crate) fn has_observer(&self, observer: &Arc<dyn GulpObserver>) -> bool {
        Arc::ptr_eq(&self.observer, observer)
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<GulperStatus> {
        self.status_tx.subscribe()
    }

    /// Widens the target window; see [`GulperState::extend`].
    pub(crate) fn extend(&self, window: TimeWindow) -> bool {
        self.lock_state().extend(window)
    }

    /// Requests a cooperative stop. The loop notices it between chunks.
    pub(crate) fn kill(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(key = %self.key, "gulper kill requested");
        }
        self.cancel.cancel();
    }

    fn lock_state(&self) -> MutexGuard<'_, GulperState> {
        self.state.lock().expect("gulper state mutex poisoned")
    }

    #[tracing::instrument(name = "gulper", skip_all, fields(key = %self.key, id = self.id))]
    pub(crate) async fn run(self: Arc<Self>, registry: Arc<RegistryInner>) {
        {
            let mut state = self.lock_state();
            state.set_status(GulperStatus::Running);
            tracing::info!(window = %state.target(), "gulper started");
        }
        self.status_tx.send_replace(GulperStatus::Running);

        loop {
            let chunk = match self.plan_next(&registry) {
                Step::Fetch(chunk) => chunk,
                Step::Finished(status) => {
                    self.report_finished(status, &registry);
                    return;
                }
            };

            match self.fetch_chunk(chunk, &registry).await {
                Ok(segment) => self.deliver_chunk(chunk, segment, &registry),
                Err(err) if err.is::<RetryCancelled>() => {
                    tracing::debug!(chunk = %chunk, "chunk abandoned after kill");
                    self.finalize(&registry, GulperStatus::Killed);
                    self.report_finished(GulperStatus::Killed, &registry);
                    return;
                }
                Err(err) => {
                    self.fail(err, &registry);
                    return;
                }
            }
        }
    }

    /// Picks the next chunk, or performs the terminal transition. The final
    /// "nothing left" decision is taken under the registry lock so a
    /// concurrent `request` either extends this gulper in time or finds the
    /// key free.
    fn plan_next(&self, registry: &RegistryInner) -> Step {
        let gulp_size = registry.config.gulp_size();

        if !self.cancel.is_cancelled() {
            if let Some(chunk) = self.lock_state().next_chunk(gulp_size) {
                return Step::Fetch(chunk);
            }
        }

        let mut gulpers = registry.lock_gulpers();
        let mut state = self.lock_state();
        let status = if self.cancel.is_cancelled() {
            GulperStatus::Killed
        } else if let Some(chunk) = state.next_chunk(gulp_size) {
            return Step::Fetch(chunk);
        } else {
            debug_assert!(state.is_exhausted());
            GulperStatus::Done
        };
        state.set_status(status);
        drop(state);
        registry.remove(&mut gulpers, self);
        Step::Finished(status)
    }

    async fn fetch_chunk(
        &self,
        chunk: TimeWindow,
        registry: &RegistryInner,
    ) -> Result<Option<Segment>> {
        let attempts = AtomicUsize::new(0);

        let result = retry_with_backoff(
            RetryPolicy::from_config(&registry.config),
            &self.cancel,
            |attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                self.fetch_once(chunk, registry)
            },
            classify_fetch_error,
            |failed| {
                registry.telemetry.record_source_error();
                match failed.next_delay {
                    Some(delay) => tracing::warn!(
                        chunk = %chunk,
                        attempt = failed.number,
                        backoff_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64,
                        error = %failed.error,
                        "chunk fetch failed; retrying"
                    ),
                    None => tracing::error!(
                        chunk = %chunk,
                        attempt = failed.number,
                        error = %failed.error,
                        "chunk fetch exhausted retries"
                    ),
                }
            },
        )
        .await;

        result.map_err(|err| {
            if err.is::<RetryCancelled>() {
                return err;
            }
            let rejected = err
                .downcast_ref::<SourceError>()
                .is_some_and(|source_err| !source_err.is_retryable());
            if rejected {
                err.context(GulpError::Rejected { window: chunk })
            } else {
                err.context(GulpError::SourceUnavailable {
                    window: chunk,
                    attempts: attempts.load(Ordering::Relaxed),
                })
            }
        })
    }

    /// One attempt: wait for a fetch slot, then perform the call. A kill
    /// while queued for a slot abandons the chunk; a kill during the call
    /// does not interrupt it.
    async fn fetch_once(
        &self,
        chunk: TimeWindow,
        registry: &RegistryInner,
    ) -> Result<Option<Segment>> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RetryCancelled.into()),
            permit = registry.fetch_permits.acquire() => {
                permit.context("fetch permit pool closed")?
            }
        };

        tracing::trace!(chunk = %chunk, "fetching chunk");
        self.source
            .fetch(&self.channel, chunk)
            .await
            .with_context(|| format!("failed to fetch {chunk} for {}", self.key))
    }

    fn deliver_chunk(&self, chunk: TimeWindow, segment: Option<Segment>, registry: &RegistryInner) {
        let coverage = {
            let mut state = self.lock_state();
            state.record_chunk(chunk);
            state.coverage()
        };

        match &segment {
            Some(segment) => registry.cache.store(&self.channel, segment),
            None => tracing::debug!(chunk = %chunk, "source returned no data; recording gap"),
        }
        registry.telemetry.record_chunk(segment.is_none());

        self.observer.on_event(GulpEvent::Chunk {
            channel: self.channel.clone(),
            window: chunk,
            segment,
            coverage,
        });
    }

    fn fail(&self, err: anyhow::Error, registry: &RegistryInner) {
        self.finalize(registry, GulperStatus::Done);
        registry.telemetry.record_gulper_failed();
        let coverage = self.coverage();
        tracing::error!(coverage = %coverage, error = %format!("{err:#}"), "gulper failed");

        self.observer.on_event(GulpEvent::Failed {
            channel: self.channel.clone(),
            coverage,
            error: err,
        });
        self.status_tx.send_replace(GulperStatus::Done);
    }

    /// Terminal cleanup for a task that panicked mid-loop.
    pub(crate) fn abandon(&self, message: String, registry: &RegistryInner) {
        let status = self.status();
        if status.is_terminal() {
            tracing::error!(panic = %message, "gulper panicked after finishing");
            self.status_tx.send_replace(status);
            return;
        }
        self.fail(GulpError::WorkerPanicked { message }.into(), registry);
    }

    fn finalize(&self, registry: &RegistryInner, status: GulperStatus) {
        let mut gulpers = registry.lock_gulpers();
        self.lock_state().set_status(status);
        registry.remove(&mut gulpers, self);
    }

    fn report_finished(&self, status: GulperStatus, registry: &RegistryInner) {
        let coverage = self.coverage();
        let event = match status {
            GulperStatus::Killed => {
                registry.telemetry.record_gulper_cancelled();
                tracing::info!(coverage = %coverage, "gulper cancelled");
                GulpEvent::Cancelled {
                    channel: self.channel.clone(),
                    coverage,
                }
            }
            _ => {
                registry.telemetry.record_gulper_completed();
                tracing::info!(coverage = %coverage, "gulper finished");
                GulpEvent::Done {
                    channel: self.channel.clone(),
                    coverage,
                }
            }
        };

        self.observer.on_event(event);
        self.status_tx.send_replace(status);
    }
}

fn classify_fetch_error(err: &anyhow::Error) -> RetryDisposition {
    if err.is::<RetryCancelled>() {
        return RetryDisposition::Abort;
    }

    match err.downcast_ref::<SourceError>() {
        Some(source_err) if !source_err.is_retryable() => RetryDisposition::Abort,
        _ => RetryDisposition::Retry,
    }
}
