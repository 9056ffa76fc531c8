//! Polling Primitives
//!
//! Every wait in the migration is a fixed-interval poll bounded by an
//! optional deadline and the caller's cancellation token. Failures inside a
//! poll are counted per check and only become fatal once the same check has
//! failed several times in a row.

use crate::error::{Error, Result};
use crate::rook::RookContext;
use k8s_openapi::api::apps::v1::Deployment;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Pacer
// =============================================================================

/// Why a wait stopped before its condition was met
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl Interrupted {
    /// Turn the interruption into the matching error
    pub fn into_error(self, operation: impl Into<String>, last_status: Option<String>) -> Error {
        match self {
            Interrupted::Cancelled => Error::Cancelled {
                operation: operation.into(),
            },
            Interrupted::DeadlineExceeded => Error::Timeout {
                operation: operation.into(),
                last_status,
            },
        }
    }
}

/// Sleeps between polls until the deadline passes or the token is cancelled
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Pacer {
    /// `timeout` of `None` waits until cancelled
    pub fn new(interval: Duration, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            interval,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    async fn deadline_passed(&self) {
        match self.deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => futures::future::pending::<()>().await,
        }
    }

    /// Wait one interval
    pub async fn tick(&self) -> std::result::Result<(), Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = self.deadline_passed() => Err(Interrupted::DeadlineExceeded),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }

    /// Run one poll's work, dropping it if the token fires or the deadline
    /// passes first. A hung API call must not outlive the wait it belongs to.
    pub async fn guard<F: Future>(&self, work: F) -> std::result::Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = self.deadline_passed() => Err(Interrupted::DeadlineExceeded),
            output = work => Ok(output),
        }
    }
}

// =============================================================================
// Consecutive Failure Budget
// =============================================================================

/// Counts consecutive failures of one check; any success resets it
#[derive(Debug)]
pub struct FailureBudget {
    operation: &'static str,
    limit: u32,
    consecutive: u32,
}

impl FailureBudget {
    pub fn new(operation: &'static str, limit: u32) -> Self {
        Self {
            operation,
            limit,
            consecutive: 0,
        }
    }

    pub fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure; escalates once `limit` failures happened in a row.
    /// Errors that polling cannot fix are returned straight away.
    pub fn failure(&mut self, err: Error) -> Result<()> {
        if !err.is_retryable() {
            return Err(err);
        }
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            return Err(Error::RepeatedFailures {
                operation: self.operation.to_string(),
                attempts: self.consecutive,
                source: Box::new(err),
            });
        }
        warn!(
            operation = self.operation,
            attempt = self.consecutive,
            error = %err,
            "Polling failed, retrying"
        );
        Ok(())
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

// =============================================================================
// Deployment Scale
// =============================================================================

/// True once every replica counter of the deployment equals `desired`
pub fn deployment_at_scale(deployment: &Deployment, desired: i32) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return desired == 0;
    };

    status.replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
        && status.ready_replicas.unwrap_or(0) == desired
        && status.updated_replicas.unwrap_or(0) == desired
}

/// Wait until a deployment reports exactly `desired` replicas everywhere.
///
/// Fails straight away if the deployment's spec asks for a different count,
/// since then someone else is scaling it.
pub async fn await_deployment_scale(
    ctx: &RookContext,
    name: &str,
    desired: i32,
    timeout: Duration,
) -> Result<()> {
    let namespace = &ctx.config.namespace;
    ctx.progress.report(&format!(
        "Waiting for deployment {} in {} to reach scale of {}",
        name, namespace, desired
    ));

    let pacer = Pacer::new(ctx.config.poll_interval(), Some(timeout), ctx.cancel.clone());
    let mut failures = FailureBudget::new("check deployment status", ctx.config.max_consecutive_failures);
    let mut observed = None;

    let stopped = |interrupted: Interrupted, observed: Option<i32>| {
        interrupted.into_error(
            format!("deployment {}:{} to reach scale {}", namespace, name, desired),
            Some(format!("{} replicas", observed.unwrap_or(0))),
        )
    };

    loop {
        let fetched = pacer
            .guard(ctx.api.get_deployment(namespace, name))
            .await
            .map_err(|i| stopped(i, observed))?;

        match fetched {
            Ok(Some(deployment)) => {
                failures.success();

                if let Some(spec_replicas) = deployment.spec.as_ref().and_then(|s| s.replicas) {
                    if spec_replicas != desired {
                        return Err(Error::UnexpectedScale {
                            namespace: namespace.clone(),
                            name: name.to_string(),
                            actual: spec_replicas,
                            expected: desired,
                        });
                    }
                }

                if deployment_at_scale(&deployment, desired) {
                    debug!(deployment = name, desired, "Deployment reached scale");
                    return Ok(());
                }
                observed = deployment.status.as_ref().and_then(|s| s.replicas);
            }
            Ok(None) => failures.failure(Error::ResourceNotFound {
                kind: "Deployment".into(),
                name: name.to_string(),
            })?,
            Err(e) => failures.failure(e)?,
        }

        pacer.tick().await.map_err(|i| stopped(i, observed))?;
    }
}
