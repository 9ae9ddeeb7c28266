//! Polling with a two-phase backoff schedule and cancellation support.
//!
//! Every wait point in a run (cluster, instance, endpoint, restorable time,
//! snapshot) goes through [`wait_until`]. The schedule is:
//!
//! 1. A constant phase of `floor(budget / interval)` attempts separated by
//!    a jittered `interval`.
//! 2. An exponential phase starting at `interval`, doubling up to
//!    `ceiling_factor * interval`, until the run is cancelled or the
//!    optional hard limit expires.
//!
//! The probe reports a tri-state [`Probe`]; a hard failure stops the wait
//! immediately and is never retried.

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use mascaras_common::defaults::{
    BACKOFF_CEILING_FACTOR, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_WAIT_BUDGET_SECS,
    DEFAULT_WAIT_HARD_LIMIT_SECS, DEFAULT_WAIT_JITTER,
};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Schedule for a single wait point.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    /// Base polling interval
    pub interval: Duration,
    /// Time covered by the constant-interval phase
    pub budget: Duration,
    /// Give up with [`WaitError::Timeout`] after this long (`None` waits until cancelled)
    pub hard_limit: Option<Duration>,
    /// Relative jitter (0.05 = ±5%) applied to every delay
    pub jitter: f64,
    /// Cap of the exponential phase as a multiple of `interval`
    pub ceiling_factor: u32,
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            budget: Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS),
            hard_limit: Some(Duration::from_secs(DEFAULT_WAIT_HARD_LIMIT_SECS)),
            jitter: DEFAULT_WAIT_JITTER,
            ceiling_factor: BACKOFF_CEILING_FACTOR,
        }
    }
}

impl WaitSpec {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval,
            budget,
            ..Default::default()
        }
    }

    pub fn with_hard_limit(mut self, limit: Option<Duration>) -> Self {
        self.hard_limit = limit;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Number of probes made in the constant phase
    pub fn constant_attempts(&self) -> usize {
        if self.interval.is_zero() {
            return 0;
        }
        (self.budget.as_nanos() / self.interval.as_nanos()) as usize
    }

    /// Largest delay the exponential phase will use
    pub fn max_delay(&self) -> Duration {
        self.interval * self.ceiling_factor.max(1)
    }
}

/// Outcome of a single probe.
#[derive(Debug)]
pub enum Probe<T> {
    /// The condition holds; the wait returns this value.
    Met(T),
    /// Not yet; poll again after the next delay.
    NotYet,
    /// Hard failure; abort the wait without retrying.
    Failed(anyhow::Error),
}

/// Which part of the schedule a wait finished in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    Constant,
    Exponential,
}

/// Successful wait result.
#[derive(Debug)]
pub struct Ready<T> {
    pub value: T,
    pub attempts: u32,
    pub phase: WaitPhase,
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("failed to wait {resource} available, timeout after {attempts} attempts")]
    Timeout { resource: String, attempts: u32 },

    #[error("wait for {resource} cancelled")]
    Cancelled { resource: String },

    #[error("failed while waiting for {resource}")]
    Probe {
        resource: String,
        #[source]
        source: anyhow::Error,
    },
}

impl WaitError {
    pub fn resource(&self) -> &str {
        match self {
            WaitError::Timeout { resource, .. }
            | WaitError::Cancelled { resource }
            | WaitError::Probe { resource, .. } => resource,
        }
    }
}

/// Apply symmetric jitter to a delay.
fn jittered_delay(base: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor);
    Duration::from_secs_f64((base.as_secs_f64() * (1.0 + jitter)).max(0.0))
}

enum Slept {
    Elapsed,
    Cancelled,
    Deadline,
}

async fn sleep_or_stop(
    delay: Duration,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Slept {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Slept::Elapsed,
        _ = cancel.cancelled() => Slept::Cancelled,
        _ = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        } => Slept::Deadline,
    }
}

/// Poll `probe` until it reports [`Probe::Met`].
///
/// Returns [`WaitError::Cancelled`] as soon as `cancel` fires (including
/// while a probe is in flight), [`WaitError::Timeout`] once the hard limit
/// is reached, and [`WaitError::Probe`] on the first hard probe failure.
pub async fn wait_until<T, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    resource: &str,
    mut probe: F,
) -> Result<Ready<T>, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let deadline = spec.hard_limit.map(|limit| Instant::now() + limit);
    let mut attempts = 0u32;

    let constant = ConstantBuilder::default()
        .with_delay(spec.interval)
        .with_max_times(spec.constant_attempts().saturating_sub(1))
        .build();
    let exponential = ExponentialBuilder::default()
        .with_min_delay(spec.interval)
        .with_max_delay(spec.max_delay())
        .with_factor(2.0)
        .build();

    let schedule = constant
        .map(|d| (WaitPhase::Constant, d))
        .chain(exponential.map(|d| (WaitPhase::Exponential, d)));
    let mut schedule = schedule.fuse();
    let mut phase = if spec.constant_attempts() > 0 {
        WaitPhase::Constant
    } else {
        WaitPhase::Exponential
    };

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled {
                resource: resource.to_string(),
            });
        }
        attempts += 1;

        let outcome = tokio::select! {
            outcome = probe() => outcome,
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled { resource: resource.to_string() });
            }
        };

        match outcome {
            Probe::Met(value) => {
                debug!(resource = %resource, attempts, phase = ?phase, "Resource ready");
                return Ok(Ready {
                    value,
                    attempts,
                    phase,
                });
            }
            Probe::Failed(source) => {
                warn!(resource = %resource, error = %source, "Resource check failed");
                return Err(WaitError::Probe {
                    resource: resource.to_string(),
                    source,
                });
            }
            Probe::NotYet => {}
        }

        // The exponential iterator stops after a few steps; keep polling at the cap.
        let (next_phase, base) = schedule
            .next()
            .unwrap_or((WaitPhase::Exponential, spec.max_delay()));
        phase = next_phase;
        let delay = jittered_delay(base, spec.jitter);
        debug!(
            resource = %resource,
            attempt = attempts,
            phase = ?phase,
            delay_ms = delay.as_millis(),
            "Resource not ready, retrying"
        );

        match sleep_or_stop(delay, cancel, deadline).await {
            Slept::Elapsed => {}
            Slept::Cancelled => {
                return Err(WaitError::Cancelled {
                    resource: resource.to_string(),
                });
            }
            Slept::Deadline => {
                return Err(WaitError::Timeout {
                    resource: resource.to_string(),
                    attempts,
                });
            }
        }
    }
}
