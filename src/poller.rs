//! Convergence poller.
//!
//! Remote operations are asynchronous on the engine side: a call returns
//! while the object is still transitioning. [`wait_for_state`] polls a
//! refresh function until the observed status reaches a target, failing fast
//! on anything outside the declared pending set.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{Error, Result};

/// Default pause between refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// Configuration
// =============================================================================

/// Which statuses are transitional and which end the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeConf {
    label: String,
    pending: Vec<String>,
    target: Vec<String>,
    interval: Duration,
    timeout: Option<Duration>,
}

impl StateChangeConf {
    /// Pending and target must be disjoint and target non-empty.
    pub fn new(label: impl Into<String>, pending: &[&str], target: &[&str]) -> Result<Self> {
        if target.is_empty() {
            return Err(Error::internal("state change needs at least one target"));
        }
        if let Some(overlap) = pending.iter().find(|s| target.contains(s)) {
            return Err(Error::internal(format!(
                "status '{}' is both pending and target",
                overlap
            )));
        }
        Ok(Self {
            label: label.into(),
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn target(&self) -> &[String] {
        &self.target
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// One refresh result: the resource snapshot and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<T> {
    pub resource: T,
    pub status: String,
}

impl<T> Observation<T> {
    pub fn new(resource: T, status: impl Into<String>) -> Self {
        Self {
            resource,
            status: status.into(),
        }
    }
}

// =============================================================================
// Sleeping
// =============================================================================

/// Pause between refreshes. Injected so tests never wait on a real clock.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Polling loop
// =============================================================================

/// Poll `refresh` until the observed status is in the target set.
///
/// `refresh` returns `Ok(None)` (or an empty status) while the resource is not
/// yet visible; that counts as pending. Refresh errors propagate without
/// retry. Cancellation is checked before every refresh, after every
/// non-target observation and while sleeping.
pub async fn wait_for_state<T, F, Fut>(
    conf: &StateChangeConf,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    mut refresh: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Observation<T>>>>,
{
    let deadline = conf.timeout.map(|timeout| Instant::now() + timeout);
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("wait_interrupted: label={}, attempts={}", conf.label, attempts);
            return Err(Error::Interrupted);
        }

        attempts += 1;
        match refresh().await? {
            Some(observation) if !observation.status.is_empty() => {
                if conf.target.contains(&observation.status) {
                    tracing::debug!(
                        "wait_converged: label={}, status={}, attempts={}",
                        conf.label,
                        observation.status,
                        attempts
                    );
                    return Ok(observation.resource);
                }
                if cancel.is_cancelled() {
                    return Err(Error::Interrupted);
                }
                if !conf.pending.contains(&observation.status) {
                    tracing::warn!(
                        "wait_unexpected_state: label={}, status={}",
                        conf.label,
                        observation.status
                    );
                    return Err(Error::unexpected_state(observation.status, &conf.target));
                }
                tracing::trace!(
                    "wait_pending: label={}, status={}, attempt={}",
                    conf.label,
                    observation.status,
                    attempts
                );
            }
            _ => {
                tracing::trace!("wait_not_visible: label={}, attempt={}", conf.label, attempts);
            }
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Error::timeout(format!(
                    "{} did not reach '{}' after {} attempts",
                    conf.label,
                    conf.target.join(", "),
                    attempts
                )));
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("wait_interrupted: label={}, attempts={}", conf.label, attempts);
                return Err(Error::Interrupted);
            }
            _ = sleeper.sleep(conf.interval) => {}
        }
    }
}
