//! Adaptive throughput controller
//!
//! Wraps a backend call. When the call is rejected for exceeding provisioned
//! throughput, the controller raises capacity on the table and every index,
//! waits for the change to take effect, backs off and tries again. After a
//! success that needed a scale-up, a detached task lowers capacity again once
//! the cool-off window has passed. An invocation dropped by its caller after
//! raising capacity schedules the same task.
//!
//! ```text
//! Attempting ──> Succeeded | ScalingUp | Failed
//! ScalingUp ──> WaitingForActive | Failed
//! WaitingForActive ──> Backoff | Failed
//! Backoff ──> Attempting
//! ```
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::time::{Instant, sleep};

use crate::backend::{ProvisionedCapacity, TableBackend};
use crate::config::{ScalingConfig, ScalingOverrides};
use crate::error::Error;

mod backoff;
mod scaling;

use scaling::ScaleDownPlan;

/// Capacity direction an operation consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read capacity units
    Read,
    /// Write capacity units
    Write,
}

impl Direction {
    /// The component of `capacity` in this direction
    pub fn of(self, capacity: ProvisionedCapacity) -> i64 {
        match self {
            Direction::Read => capacity.read,
            Direction::Write => capacity.write,
        }
    }

    /// `capacity` with this direction replaced by `value`
    pub fn with(self, capacity: ProvisionedCapacity, value: i64) -> ProvisionedCapacity {
        match self {
            Direction::Read => ProvisionedCapacity {
                read: value,
                ..capacity
            },
            Direction::Write => ProvisionedCapacity {
                write: value,
                ..capacity
            },
        }
    }

    /// Configured `(base, max)` for this direction
    pub fn bounds(self, config: &ScalingConfig) -> (i64, i64) {
        match self {
            Direction::Read => (config.base_read_capacity, config.max_read_capacity),
            Direction::Write => (config.base_write_capacity, config.max_write_capacity),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Controller state
#[derive(Debug)]
pub enum Phase<T> {
    /// Invoking the wrapped call
    Attempting,
    /// Raising capacity after a capacity error
    ScalingUp,
    /// Polling until the raised capacity is active
    WaitingForActive,
    /// Sleeping before the next attempt
    Backoff,
    /// The wrapped call succeeded
    Succeeded(T),
    /// Terminal failure
    Failed(Error),
}

/// State after an attempt that produced `result`
///
/// `attempts` counts the attempts made so far, including this one.
pub fn after_attempt<T>(result: Result<T, Error>, attempts: u32, max_retries: u32) -> Phase<T> {
    match result {
        Ok(value) => Phase::Succeeded(value),
        Err(err) if err.is_retryable() && attempts <= max_retries => Phase::ScalingUp,
        Err(err) => Phase::Failed(err),
    }
}

/// Outcome of one controlled invocation
#[derive(Debug)]
pub struct Execution<T> {
    /// Value of the wrapped call, or the error that ended the invocation
    pub result: Result<T, Error>,
    /// Number of times the wrapped call was invoked
    pub attempts: u32,
    /// Total time spent in backoff sleeps
    pub retry_delay: Duration,
    /// Number of completed scale-ups
    pub scale_ups: u32,
}

/// Runs backend calls under the adaptive scaling policy
#[derive(Debug, Clone)]
pub struct ThroughputController {
    backend: Arc<dyn TableBackend>,
    config: ScalingConfig,
}

impl ThroughputController {
    /// Create a controller scaling the resources of `backend`
    pub fn new(backend: Arc<dyn TableBackend>, config: ScalingConfig) -> Self {
        Self { backend, config }
    }

    /// Process-wide configuration
    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Invoke `operation` until it succeeds, fails with a non-capacity error,
    /// or exhausts its retries
    ///
    /// Never spends more than `max_retries + 1` attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        direction: Direction,
        overrides: Option<&ScalingOverrides>,
        mut operation: F,
    ) -> Execution<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let config = match overrides {
            Some(overrides) => self.config.with_overrides(overrides),
            None => self.config.clone(),
        };

        let mut pending = PendingScaleDown::new(
            Arc::clone(&self.backend),
            ScaleDownPlan::new(direction, &config),
            config.scale_down_cool_off,
        );
        let mut attempts = 0;
        let mut backoffs = 0;
        let mut scale_ups = 0;
        let mut retry_delay = Duration::ZERO;
        let mut phase = Phase::Attempting;

        let result = loop {
            phase = match phase {
                Phase::Attempting => {
                    attempts += 1;
                    let result = operation().await;
                    if let Err(err) = &result {
                        tracing::debug!(
                            attempt = attempts,
                            direction = %direction,
                            retryable = err.is_retryable(),
                            error = %err,
                            "Attempt failed"
                        );
                    }
                    after_attempt(result, attempts, config.max_retries)
                }
                Phase::ScalingUp => {
                    match self.scale_up(direction, &config, &mut pending.plan).await {
                        Ok(()) => {
                            scale_ups += 1;
                            Phase::WaitingForActive
                        }
                        Err(err) => Phase::Failed(err),
                    }
                }
                Phase::WaitingForActive => match self.wait_for_active(&config).await {
                    Ok(()) => Phase::Backoff,
                    Err(err) => Phase::Failed(err),
                },
                Phase::Backoff => {
                    let delay = backoff::retry_delay(
                        backoffs,
                        config.initial_backoff,
                        config.max_backoff,
                        config.backoff_multiplier,
                    );
                    tracing::debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    sleep(delay).await;
                    backoffs += 1;
                    retry_delay += delay;
                    Phase::Attempting
                }
                Phase::Succeeded(value) => break Ok(value),
                Phase::Failed(err) => break Err(err),
            };
        };

        if result.is_err() {
            pending.disarm();
        }
        drop(pending);

        Execution {
            result,
            attempts,
            retry_delay,
            scale_ups,
        }
    }

    /// Raise `direction` on the table and every index
    ///
    /// Resources already at their maximum are left alone. Any backend failure
    /// here ends the invocation with [`Error::ScalingFailed`].
    async fn scale_up(
        &self,
        direction: Direction,
        config: &ScalingConfig,
        plan: &mut ScaleDownPlan,
    ) -> Result<(), Error> {
        for resource in self.backend.resources() {
            let current = self
                .backend
                .describe_capacity(&resource)
                .await
                .map_err(scaling_failed)?;
            let target = scaling::raised(current.capacity, direction, config);

            if target == current.capacity {
                tracing::debug!(
                    resource = %resource,
                    direction = %direction,
                    current = direction.of(current.capacity),
                    "Capacity already at maximum"
                );
                continue;
            }

            tracing::info!(
                resource = %resource,
                direction = %direction,
                read = target.read,
                write = target.write,
                "Scaling up capacity"
            );
            self.backend
                .update_capacity(&resource, target)
                .await
                .map_err(scaling_failed)?;
            plan.record(resource, direction.of(target));
        }

        Ok(())
    }

    /// Poll until the table and every index report active
    async fn wait_for_active(&self, config: &ScalingConfig) -> Result<(), Error> {
        let started = Instant::now();

        loop {
            if self.all_active().await {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= config.max_activation_wait {
                return Err(Error::ActivationTimeout { waited });
            }

            sleep(config.activation_poll_interval).await;
        }
    }

    async fn all_active(&self) -> bool {
        for resource in self.backend.resources() {
            match self.backend.describe_capacity(&resource).await {
                Ok(state) if state.is_active() => {}
                Ok(state) => {
                    tracing::debug!(
                        resource = %resource,
                        status = ?state.status,
                        "Waiting for capacity change"
                    );
                    return false;
                }
                Err(err) => {
                    tracing::warn!(resource = %resource, error = %err, "Status poll failed");
                    return false;
                }
            }
        }
        true
    }
}

/// Scale-down owed by one invocation
///
/// Scheduled when dropped, unless disarmed. The invocation drops it on
/// success, and so does a caller that abandons the invocation mid-retry.
#[derive(Debug)]
struct PendingScaleDown {
    backend: Arc<dyn TableBackend>,
    plan: ScaleDownPlan,
    cool_off: Duration,
    armed: bool,
}

impl PendingScaleDown {
    fn new(backend: Arc<dyn TableBackend>, plan: ScaleDownPlan, cool_off: Duration) -> Self {
        Self {
            backend,
            plan,
            cool_off,
            armed: true,
        }
    }

    /// A failed invocation owes no scale-down
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingScaleDown {
    fn drop(&mut self) {
        if !self.armed || self.plan.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => schedule_scale_down(
                &handle,
                Arc::clone(&self.backend),
                self.plan.clone(),
                self.cool_off,
            ),
            Err(_) => tracing::warn!(
                direction = %self.plan.direction,
                resources = self.plan.levels.len(),
                "No runtime to schedule scale-down; capacity left raised"
            ),
        }
    }
}

/// Lower capacity again after `cool_off`, detached from the caller
///
/// Failures are logged and dropped.
fn schedule_scale_down(
    handle: &tokio::runtime::Handle,
    backend: Arc<dyn TableBackend>,
    plan: ScaleDownPlan,
    cool_off: Duration,
) {
    tracing::info!(
        direction = %plan.direction,
        resources = plan.levels.len(),
        cool_off_ms = cool_off.as_millis() as u64,
        "Scale-down scheduled"
    );

    let _ = handle.spawn(async move {
        sleep(cool_off).await;
        match plan.run(backend.as_ref()).await {
            Ok(lowered) => tracing::debug!(lowered, "Scale-down finished"),
            Err(err) => {
                tracing::warn!(error = %err, "Scale-down failed; capacity left raised")
            }
        }
    });
}

fn scaling_failed(err: Error) -> Error {
    Error::ScalingFailed {
        message: err.to_string(),
    }
}
