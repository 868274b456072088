pub mod pipeline;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::keylist::Endpoint;
use crate::queue::{RefresherMessageQueue, RefresherStatus, ValidatorMessageQueue};
use crate::store::TrustStore;

pub use pipeline::{Pipeline, SyncError, VerifiedKeylist};

/// The pair of status queues for one synchronization session.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub validator: Arc<ValidatorMessageQueue>,
    pub refresher: Arc<RefresherMessageQueue>,
}

#[derive(Debug, Default)]
struct ScheduleState {
    stopped: bool,
    wake: bool,
}

/// Cooperative control of the background loop: stop it, or start the next cycle now.
#[derive(Debug, Default)]
pub struct Schedule {
    state: Mutex<ScheduleState>,
    cv: Condvar,
}

impl Schedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stop(&self) {
        self.lock().stopped = true;
        self.cv.notify_all();
    }

    pub fn wake(&self) {
        self.lock().wake = true;
        self.cv.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Sleep until `interval` passes, [`Schedule::wake`] or [`Schedule::stop`].
    /// Returns `false` once stopped.
    pub fn wait(&self, interval: Duration) -> bool {
        let guard = self.lock();
        let (mut guard, _) = self
            .cv
            .wait_timeout_while(guard, interval, |s| !s.stopped && !s.wake)
            .unwrap_or_else(PoisonError::into_inner);
        guard.wake = false;
        !guard.stopped
    }
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub synced: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub keys_applied: usize,
    pub stopped: bool,
}

pub struct Refresher {
    pipeline: Pipeline,
    store: Arc<dyn TrustStore>,
}

impl Refresher {
    #[must_use]
    pub fn new(pipeline: Pipeline, store: Arc<dyn TrustStore>) -> Self {
        Self { pipeline, store }
    }

    /// One pass over `endpoints`. Per-endpoint failures are reported on the
    /// session queues and in the returned report, never raised.
    pub fn run_cycle(
        &self,
        endpoints: &[Endpoint],
        session: &Session,
        schedule: &Schedule,
    ) -> CycleReport {
        let queue = &session.refresher;
        let mut report = CycleReport::default();
        queue.add_message(RefresherStatus::Starting, None, None);
        log::info!("refresh starting for {} keylists", endpoints.len());

        let mut verified = Vec::new();
        let mut total = 0;
        for endpoint in endpoints {
            if schedule.is_stopped() {
                report.stopped = true;
                break;
            }
            match self.pipeline.check(endpoint, &session.validator) {
                Ok(kl) => {
                    total += kl.document.keys.len();
                    verified.push(kl);
                }
                Err(e) => {
                    log::warn!("{}: {e}", endpoint.url);
                    queue.add_message(RefresherStatus::Error, Some(total), None);
                    report.failed.push((endpoint.url.clone(), e.to_string()));
                }
            }
        }

        let mut current = 0;
        for kl in &verified {
            if report.stopped || schedule.is_stopped() {
                report.stopped = true;
                break;
            }
            let source = kl.endpoint.url.as_str();
            let mut failure = None;
            for (i, key) in kl.document.keys.iter().enumerate() {
                let applied = if key.revoked {
                    self.store.revoke(source, &kl.digest, key)
                } else {
                    self.store.trust(source, &kl.digest, key)
                };
                if let Err(e) = applied {
                    // Keep progress monotonic: skip the rest of this keylist.
                    current += kl.document.keys.len() - i;
                    failure = Some(SyncError::Store(e));
                    break;
                }
                current += 1;
                report.keys_applied += 1;
                queue.add_message(RefresherStatus::InProgress, Some(total), Some(current));
            }
            match failure {
                None => report.synced.push(source.to_string()),
                Some(e) => {
                    log::warn!("{source}: {e}");
                    queue.add_message(RefresherStatus::Error, Some(total), Some(current));
                    report.failed.push((source.to_string(), e.to_string()));
                }
            }
        }

        queue.add_message(RefresherStatus::Finished, Some(total), Some(current));
        log::info!(
            "refresh finished: {} synced, {} failed, {} keys applied{}",
            report.synced.len(),
            report.failed.len(),
            report.keys_applied,
            if report.stopped { " (stopped)" } else { "" }
        );
        report
    }

    /// Run cycles on a dedicated thread every `interval` until `schedule` is stopped.
    ///
    /// # Errors
    /// Returns an error when the thread cannot be spawned.
    pub fn spawn(
        self: Arc<Self>,
        endpoints: Vec<Endpoint>,
        session: Session,
        schedule: Arc<Schedule>,
        interval: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("keysync-refresher".into())
            .spawn(move || loop {
                if schedule.is_stopped() {
                    break;
                }
                self.run_cycle(&endpoints, &session, &schedule);
                if !schedule.wait(interval) {
                    break;
                }
            })
    }
}
