//! Bounded polling, settle waits and instance readiness
//!
//! Every wait here is bounded by a timeout and returns early when the run's
//! [`CancellationToken`] fires, so an interrupted run stops between steps.

use crate::error::{CloudError, Result};
use crate::provider::{CloudProvider, InstancePhase};
use crate::resource::{ExternalId, ResourceKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polling cadence for bounded waits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Delay after the first unsuccessful check
    pub initial_delay: Duration,
    /// Cap for the doubling delay
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(600),
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of a bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut(Duration),
}

/// Poll `check` until it yields a value or the timeout elapses.
///
/// `check` returns `Ok(Some(_))` when the condition holds and `Ok(None)` to
/// keep waiting. Transient errors are logged and polled through; any
/// other error ends the wait.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    config: &WaitConfig,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut delay = config.initial_delay;
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(CloudError::Cancelled(format!("wait for {}", what)));
        }

        attempts += 1;
        match check().await {
            Ok(Some(value)) => {
                debug!(resource = %what, attempts, "Condition met");
                return Ok(PollOutcome::Ready(value));
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                debug!(resource = %what, error = %e, "Transient error while polling");
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            let waited = now - start;
            warn!(resource = %what, attempts, waited_secs = waited.as_secs(), "Wait timed out");
            return Ok(PollOutcome::TimedOut(waited));
        }

        let pause = delay.min(deadline - now);
        debug!(
            resource = %what,
            attempt = attempts,
            delay_ms = pause.as_millis() as u64,
            "Not ready, polling again"
        );
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = cancel.cancelled() => {
                return Err(CloudError::Cancelled(format!("wait for {}", what)));
            }
        }

        delay = (delay * 2).min(config.max_delay);
    }
}

/// Sleep for `duration` unless the run is cancelled first
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
    reason: &str,
) -> Result<()> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(CloudError::Cancelled(reason.to_string())),
    }
}

/// Readiness of a newly created resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Readiness {
    Ready { endpoint: Option<String> },
    TimedOut { waited: Duration },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Ready { endpoint: Some(e) } => write!(f, "ready at {}", e),
            Readiness::Ready { endpoint: None } => write!(f, "ready"),
            Readiness::TimedOut { waited } => write!(f, "timed out after {}s", waited.as_secs()),
        }
    }
}

/// Waits for resources to become operational (or gone)
#[derive(Clone)]
pub struct ReadinessWaiter {
    provider: Arc<dyn CloudProvider>,
    cancel: CancellationToken,
    poll: WaitConfig,
}

impl ReadinessWaiter {
    pub fn new(provider: Arc<dyn CloudProvider>, cancel: CancellationToken, poll: WaitConfig) -> Self {
        Self {
            provider,
            cancel,
            poll,
        }
    }

    /// Block until the resource is operational or `timeout` elapses.
    ///
    /// Only compute instances have a provider-side boot phase. Every other
    /// kind is operational once its create call returns.
    pub async fn await_ready(
        &self,
        kind: ResourceKind,
        id: &ExternalId,
        timeout: Duration,
    ) -> Result<Readiness> {
        if kind != ResourceKind::ComputeInstance {
            return Ok(Readiness::Ready { endpoint: None });
        }

        info!(id = %id, timeout_secs = timeout.as_secs(), "Waiting for instance to run");
        let config = self.poll.clone().with_timeout(timeout);
        let what = format!("instance {}", id);
        let provider = &self.provider;

        let outcome = poll_until(&what, &config, &self.cancel, || async move {
            // A just-launched instance may not be visible to lookups yet.
            let state = match provider.instance_state(id).await {
                Ok(state) => state,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };
            match state.phase {
                InstancePhase::Running => Ok(Some(state.public_ip)),
                InstancePhase::Pending | InstancePhase::Unknown => Ok(None),
                phase => Err(CloudError::ApiError(format!(
                    "instance {} is {} while waiting for it to run",
                    id, phase
                ))),
            }
        })
        .await?;

        Ok(match outcome {
            PollOutcome::Ready(endpoint) => {
                info!(id = %id, public_ip = ?endpoint, "Instance is running");
                Readiness::Ready { endpoint }
            }
            PollOutcome::TimedOut(waited) => Readiness::TimedOut { waited },
        })
    }

    /// Block until a terminated instance is fully gone or `timeout` elapses
    pub async fn await_terminated(&self, id: &ExternalId, timeout: Duration) -> Result<Readiness> {
        let config = self.poll.clone().with_timeout(timeout);
        let what = format!("termination of {}", id);
        let provider = &self.provider;

        let outcome = poll_until(&what, &config, &self.cancel, || async move {
            match provider.instance_state(id).await {
                Ok(state) if state.phase == InstancePhase::Terminated => Ok(Some(())),
                Ok(_) => Ok(None),
                Err(e) if e.is_not_found() => Ok(Some(())),
                Err(e) => Err(e),
            }
        })
        .await?;

        Ok(match outcome {
            PollOutcome::Ready(()) => Readiness::Ready { endpoint: None },
            PollOutcome::TimedOut(waited) => Readiness::TimedOut { waited },
        })
    }

    /// Fixed settle or grace period between dependent steps
    pub async fn settle(&self, duration: Duration, reason: &str) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }
        info!(seconds = duration.as_secs(), reason = %reason, "Waiting before next step");
        sleep_cancellable(duration, &self.cancel, reason).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
