//! Background Job Scheduler
//!
//! Runs named jobs at a fixed interval on the tokio runtime: once
//! immediately, then every `interval`. A name can only be scheduled once.
//! All jobs stop on [`Scheduler::shutdown`]; a job that is mid-run is
//! abandoned at its next await point.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Named periodic jobs sharing one cancellation token.
#[derive(Debug, Default)]
pub struct Scheduler {
    cancel: CancellationToken,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `job` under `name`.
    ///
    /// Returns `Ok(false)` without scheduling when `name` is already
    /// registered. Job errors are logged and the job keeps its schedule.
    pub fn schedule<F, Fut>(&self, name: &str, every: Duration, job: F) -> Result<bool>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if every.is_zero() {
            return Err(Error::Config(format!("job {} needs a non-zero interval", name)));
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Internal("scheduler is shut down".into()));
        }

        let mut jobs = self.jobs.lock();
        if jobs.contains_key(name) {
            debug!(job = name, "Job already scheduled");
            return Ok(false);
        }

        let cancel = self.cancel.child_token();
        let job_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = job() => {
                        if let Err(e) = result {
                            warn!(job = %job_name, error = %e, "Scheduled job failed");
                        }
                    }
                }
            }
            debug!(job = %job_name, "Job stopped");
        });

        jobs.insert(name.to_string(), handle);
        info!(job = name, interval_secs = every.as_secs(), "Job scheduled");
        Ok(true)
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.lock().contains_key(name)
    }

    /// Registered job names, sorted
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Token cancelled on shutdown, for tasks managed outside the scheduler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop every job and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let jobs: Vec<_> = self.jobs.lock().drain().collect();
        for (name, handle) in jobs {
            if let Err(e) = handle.await {
                warn!(job = %name, error = %e, "Job task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
