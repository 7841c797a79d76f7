use crate::gulp::{GulpKey, TimeWindow};
use std::sync::Arc;

use super::process::Gulper;
use super::state::GulperStatus;

/// Caller-side view of a gulper returned by [`crate::GulperRegistry::request`].
///
/// Holding a handle keeps the gulper's state readable after it finishes; it
/// does not keep the gulper registered.
#[derive(Clone)]
pub struct GulperHandle {
    gulper: Arc<Gulper>,
}

impl GulperHandle {
    pub(crate) fn new(gulper: Arc<Gulper>) -> Self {
        Self { gulper }
    }

    pub fn id(&self) -> u64 {
        self.gulper.id()
    }

    pub fn key(&self) -> &GulpKey {
        self.gulper.key()
    }

    pub fn target(&self) -> TimeWindow {
        self.gulper.target()
    }

    /// Contiguous window fetched so far.
    pub fn coverage(&self) -> TimeWindow {
        self.gulper.coverage()
    }

    pub fn status(&self) -> GulperStatus {
        self.gulper.status()
    }

    /// Widens the target window. No-op (returns `false`) when the window is
    /// already covered or the gulper has finished.
    pub fn extend(&self, window: TimeWindow) -> bool {
        self.gulper.extend(window)
    }

    /// Cooperative cancellation; idempotent.
    pub fn kill(&self) {
        self.gulper.kill();
    }

    /// Resolves once the gulper is terminal and its observer has received
    /// the final event.
    pub async fn wait(&self) -> GulperStatus {
        let mut status_rx = self.gulper.subscribe_status();
        let status = match status_rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.gulper.status(),
        };
        status
    }

    pub fn same_gulper(&self, other: &GulperHandle) -> bool {
        Arc::ptr_eq(&self.gulper, &other.gulper)
    }
}

impl std::fmt::Debug for GulperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GulperHandle")
            .field("id", &self.id())
            .field("key", self.key())
            .field("status", &self.status())
            .finish()
    }
}
