use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use tokio::sync::Notify;
use wavegulp::{DataSource, Segment, SourceError, TimeWindow};

pub const SAMPLE_RATE: f64 = 20.0;

/// Holds one fetch open until the test releases it.
#[derive(Clone)]
pub struct PauseGate {
    entered: Arc<Notify>,
    entered_flag: Arc<AtomicBool>,
    release: Arc<Notify>,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            entered_flag: Arc::new(AtomicBool::new(false)),
            release: Arc::new(Notify::new()),
        }
    }

    pub async fn wait_until_paused(&self, timeout: Duration) -> Result<()> {
        if self.entered_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        if tokio::time::timeout(timeout, self.entered.notified())
            .await
            .is_err()
        {
            bail!("pause gate was not entered within {:?}", timeout);
        }
        Ok(())
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn hold(&self) {
        self.entered_flag.store(true, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct Script {
    failures: HashMap<u64, usize>,
    gaps: HashSet<u64>,
    pauses: HashMap<u64, PauseGate>,
}

/// In-memory data source that records every call and can be scripted per
/// chunk start time to fail, return no data, or pause.
pub struct MockSource {
    id: String,
    requests: Mutex<Vec<(String, TimeWindow)>>,
    script: Mutex<Script>,
}

impl MockSource {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
        })
    }

    /// The next `times` fetches starting at `start` fail with a transport error.
    pub fn fail_at(&self, start: f64, times: usize) {
        self.script.lock().unwrap().failures.insert(start as u64, times);
    }

    pub fn gap_at(&self, start: f64) {
        self.script.lock().unwrap().gaps.insert(start as u64);
    }

    /// The first fetch starting at `start` blocks until the gate is released.
    pub fn pause_at(&self, start: f64) -> PauseGate {
        let gate = PauseGate::new();
        self.script
            .lock()
            .unwrap()
            .pauses
            .insert(start as u64, gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<(String, TimeWindow)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_windows(&self) -> Vec<TimeWindow> {
        self.requests()
            .into_iter()
            .map(|(_, window)| window)
            .collect()
    }
}

impl DataSource for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch<'a>(
        &'a self,
        channel: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, Result<Option<Segment>>> {
        self.requests
            .lock()
            .unwrap()
            .push((channel.to_owned(), window));

        let start = window.start() as u64;
        let (pause, fail, gap) = {
            let mut script = self.script.lock().unwrap();
            let pause = script.pauses.remove(&start);
            let fail = match script.failures.get_mut(&start) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (pause, fail, script.gaps.contains(&start))
        };

        Box::pin(async move {
            if let Some(gate) = pause {
                gate.hold().await;
            }
            if fail {
                return Err(SourceError::Unavailable {
                    reason: format!("connection reset while reading {window}"),
                }
                .into());
            }
            if gap {
                return Ok(None);
            }

            let samples = (window.width() * SAMPLE_RATE) as usize;
            Ok(Some(Segment::new(window, SAMPLE_RATE, vec![7; samples])))
        })
    }
}
