//! Poll-until-condition with a fixed interval, a deadline and cancellation.
//!
//! The predicate is evaluated immediately, then once per `interval` until it
//! returns `true`, returns an error, or `timeout` elapses. Predicate errors
//! are terminal. The last sleep is clamped to the time remaining, and an
//! evaluation still running at the deadline is abandoned, so a poll never
//! outlives `timeout` by more than one interval.
//!
//! # Example
//!
//! ```ignore
//! let poller = ConditionPoller::new(PollSpec::default(), cancel.clone())?;
//! poller
//!     .poll("domainmapping/default/hello.example.org", || async {
//!         let dm = client.get("hello.example.org").await?;
//!         Ok::<_, kube::Error>(is_ready(&dm))
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, Error, Result};
use crate::obs;

/// Interval and deadline for one poll call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollSpec {
    /// Pause between two evaluations.
    pub interval: Duration,
    /// Total time allowed before failing with [`Error::Timeout`].
    pub timeout: Duration,
}

impl Default for PollSpec {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self> {
        let spec = Self { interval, timeout };
        spec.validate()?;
        Ok(spec)
    }

    /// Check `interval > 0`, `timeout > 0` and `interval <= timeout`.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must be > 0".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("poll timeout must be > 0".to_string()));
        }
        if self.interval > self.timeout {
            return Err(Error::InvalidConfig(format!(
                "poll interval {:?} exceeds timeout {:?}",
                self.interval, self.timeout
            )));
        }
        Ok(())
    }
}

/// Read access to a remote resource plus its readiness rule.
#[async_trait]
pub trait ResourceAccessor: Send + Sync {
    type State: Send;

    /// Fetch the current state of the resource identified by `id`.
    async fn get(&self, id: &str) -> std::result::Result<Self::State, BoxError>;

    fn is_ready(&self, state: &Self::State) -> bool;

    /// Short human-readable summary used in timeout errors.
    fn describe(&self, _state: &Self::State) -> String {
        "not ready".to_string()
    }
}

struct Observation {
    ready: bool,
    description: Option<String>,
}

/// Blocks the calling task until a remote condition holds.
#[derive(Clone, Debug)]
pub struct ConditionPoller {
    spec: PollSpec,
    cancel: CancellationToken,
}

impl ConditionPoller {
    pub fn new(spec: PollSpec, cancel: CancellationToken) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec, cancel })
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    /// Poll `predicate` until it returns `Ok(true)`.
    ///
    /// `target` names what is being waited on and ends up in errors and logs.
    pub async fn poll<F, Fut, E>(&self, target: &str, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<bool, E>>,
        E: Into<BoxError>,
    {
        self.run(target, || {
            let fut = predicate();
            async move {
                fut.await.map(|ready| Observation {
                    ready,
                    description: None,
                })
            }
        })
        .await
    }

    /// Poll `accessor` for resource `id` until it reports ready.
    ///
    /// Accessor errors are terminal. A timeout carries the description of
    /// the last state seen.
    pub async fn wait_for_ready<A>(&self, accessor: &A, id: &str) -> Result<()>
    where
        A: ResourceAccessor + ?Sized,
    {
        self.run(id, || async move {
            let state = accessor.get(id).await?;
            Ok::<_, BoxError>(Observation {
                ready: accessor.is_ready(&state),
                description: Some(accessor.describe(&state)),
            })
        })
        .await
    }

    async fn run<F, Fut, E>(&self, target: &str, mut evaluate: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Observation, E>>,
        E: Into<BoxError>,
    {
        let start = Instant::now();
        let deadline = start + self.spec.timeout;
        let mut evaluations = 0u32;
        let mut last_observed: Option<String> = None;

        obs::emit_poll_started(target, self.spec.interval, self.spec.timeout);

        loop {
            evaluations += 1;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(target, start, evaluations));
                }
                outcome = evaluate() => outcome,
                _ = sleep_until(deadline) => {
                    return Err(self.timed_out(target, start, evaluations, last_observed));
                }
            };

            match outcome {
                Ok(observation) => {
                    if observation.description.is_some() {
                        last_observed = observation.description;
                    }
                    if observation.ready {
                        obs::emit_poll_finished(target, evaluations, start.elapsed(), true);
                        return Ok(());
                    }
                    obs::emit_poll_pending(target, evaluations, last_observed.as_deref());
                }
                Err(source) => {
                    obs::emit_poll_finished(target, evaluations, start.elapsed(), false);
                    return Err(Error::Predicate {
                        target: target.to_string(),
                        elapsed: start.elapsed(),
                        source: source.into(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(target, start, evaluations, last_observed));
            }
            let pause = self.spec.interval.min(deadline - now);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(target, start, evaluations));
                }
                _ = sleep(pause) => {}
            }
        }
    }

    fn cancelled(&self, target: &str, start: Instant, evaluations: u32) -> Error {
        obs::emit_poll_finished(target, evaluations, start.elapsed(), false);
        Error::Cancelled {
            target: target.to_string(),
            elapsed: start.elapsed(),
        }
    }

    fn timed_out(
        &self,
        target: &str,
        start: Instant,
        evaluations: u32,
        last_observed: Option<String>,
    ) -> Error {
        obs::emit_poll_finished(target, evaluations, start.elapsed(), false);
        Error::Timeout {
            target: target.to_string(),
            elapsed: start.elapsed(),
            last_observed: last_observed.unwrap_or_else(|| "condition not met".to_string()),
        }
    }
}
