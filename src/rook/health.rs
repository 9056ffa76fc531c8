//! Ceph Health Monitor
//!
//! Decides whether the cluster is healthy enough to take an OSD away, and
//! whether a particular OSD still holds placement groups.
//!
//! A cluster is healthy only when all of the following hold:
//!
//! - the monitors report `HEALTH_OK`
//! - nothing is being recovered
//! - no placement group is inactive, degraded or misplaced

use crate::error::{Error, Result, ResultExt};
use crate::rook::status::{CephStatus, HealthStatus};
use crate::rook::toolbox::Toolbox;
use crate::rook::wait::{FailureBudget, Interrupted, Pacer};
use crate::rook::RookContext;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Progress event Ceph keeps around even when nothing is happening
const GLOBAL_RECOVERY_EVENT: &str = "Global Recovery Event";

static SAFE_TO_DESTROY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"OSD\(s\) \d+ are safe to destroy without reducing data durability")
        .expect("static regex")
});

static PGS_MAPPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Error EBUSY: OSD\(s\) \d+ have (\d+) pgs currently mapped to them")
        .expect("static regex")
});

// =============================================================================
// Pure Checks
// =============================================================================

/// Whether the cluster is healthy, and if not, every reason why.
///
/// Violated conditions appear in a fixed order (health, recovery, ratios)
/// joined by `" and "`; a healthy cluster yields an empty message.
pub fn is_healthy(status: &CephStatus) -> (bool, String) {
    let mut problems = Vec::new();
    let pgmap = &status.pgmap;

    if status.health.status != HealthStatus::Ok {
        problems.push(format!("health is {} not HEALTH_OK", status.health.status));
    }

    if pgmap.recovering_bytes_per_sec != 0 {
        problems.push(format!(
            "{} bytes are being recovered per second, 0 desired",
            pgmap.recovering_bytes_per_sec
        ));
    }

    if has_unclean_pgs(status) {
        problems.push(format!(
            "{:.6}% of PGs are inactive, {:.6}% are degraded, and {:.6}% are misplaced, 0 required for all",
            pgmap.inactive_pgs_ratio * 100.0,
            pgmap.degraded_ratio * 100.0,
            pgmap.misplaced_ratio * 100.0
        ));
    }

    (problems.is_empty(), problems.join(" and "))
}

fn has_unclean_pgs(status: &CephStatus) -> bool {
    let pgmap = &status.pgmap;
    pgmap.inactive_pgs_ratio != 0.0 || pgmap.degraded_ratio != 0.0 || pgmap.misplaced_ratio != 0.0
}

/// One-line summary of what the cluster is busy with, for transient output.
///
/// Prefers a mgr progress event, then the PG ratios, then the raised health
/// checks. Empty when there is nothing to say.
pub fn progress_message(status: &CephStatus) -> String {
    let events: Vec<_> = status
        .progress_events
        .values()
        .filter(|e| !e.message.starts_with(GLOBAL_RECOVERY_EVENT))
        .collect();

    if let Some(first) = events.first() {
        return format!(
            "{} tasks in progress, first task {:?} is {:.6}% complete",
            events.len(),
            first.message.replace('\n', " ").trim(),
            first.progress * 100.0
        );
    }

    let pgmap = &status.pgmap;
    if has_unclean_pgs(status) || pgmap.recovering_bytes_per_sec != 0 {
        return format!(
            "{:.6}% of PGs are inactive, {:.6}% are degraded, and {:.6}% are misplaced; recovering at {} B/sec",
            pgmap.inactive_pgs_ratio * 100.0,
            pgmap.degraded_ratio * 100.0,
            pgmap.misplaced_ratio * 100.0,
            pgmap.recovering_bytes_per_sec
        );
    }

    if status.health.status != HealthStatus::Ok {
        let checks: Vec<&str> = status
            .health
            .checks
            .values()
            .map(|c| c.summary.message.as_str())
            .filter(|m| !m.is_empty())
            .collect();
        if checks.is_empty() {
            return format!("health is {}", status.health.status);
        }
        return format!("health is {}: {}", status.health.status, checks.join(", "));
    }

    String::new()
}

/// Answer of `ceph osd safe-to-destroy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeToDestroy {
    /// No placement group depends on the OSD
    Safe,
    /// `pgs` placement groups are still mapped to the OSD
    Busy { pgs: u32 },
    /// The output matched neither known phrase
    Unknown,
}

impl SafeToDestroy {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafeToDestroy::Safe)
    }

    /// `(safe, blocking pgs)`, with `-1` standing for unknown
    pub fn as_tuple(&self) -> (bool, i64) {
        match self {
            SafeToDestroy::Safe => (true, 0),
            SafeToDestroy::Busy { pgs } => (false, i64::from(*pgs)),
            SafeToDestroy::Unknown => (false, -1),
        }
    }
}

/// Parse the text printed by `ceph osd safe-to-destroy`
pub fn parse_safe_to_destroy(output: &str) -> SafeToDestroy {
    if SAFE_TO_DESTROY.is_match(output) {
        return SafeToDestroy::Safe;
    }

    PGS_MAPPED
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .map(|pgs| SafeToDestroy::Busy { pgs })
        .unwrap_or(SafeToDestroy::Unknown)
}

// =============================================================================
// Monitor
// =============================================================================

/// Polls Ceph through the toolbox
#[derive(Clone)]
pub struct HealthMonitor {
    ctx: RookContext,
    toolbox: Toolbox,
}

impl HealthMonitor {
    pub fn new(ctx: RookContext, toolbox: Toolbox) -> Self {
        Self { ctx, toolbox }
    }

    /// Run `ceph status` and decode it
    pub async fn fetch_status(&self) -> Result<CephStatus> {
        self.toolbox
            .ensure_ready()
            .await
            .context("failed to start toolbox, required for rook health checks")?;

        let output = self
            .toolbox
            .run(&["ceph", "status", "--format", "json-pretty"])
            .await
            .context("failed to run 'ceph status --format json-pretty'")?;

        CephStatus::parse(&output.stdout).context("failed to decode 'ceph status --format json-pretty'")
    }

    /// Current health verdict
    pub async fn health(&self) -> Result<(bool, String)> {
        Ok(is_healthy(&self.fetch_status().await?))
    }

    /// Ask Ceph whether `osd` can be destroyed without losing data.
    ///
    /// Ceph prints its answer on stderr and exits non-zero while PGs are
    /// still mapped; that exit is an answer, not a failure.
    pub async fn is_safe_to_remove(&self, osd: u32) -> Result<SafeToDestroy> {
        Ok(self.check_safe_to_remove(osd).await?.0)
    }

    /// [`Self::is_safe_to_remove`] plus the text Ceph printed
    async fn check_safe_to_remove(&self, osd: u32) -> Result<(SafeToDestroy, String)> {
        let target = format!("osd.{}", osd);

        let output = match self
            .toolbox
            .run(&["ceph", "osd", "safe-to-destroy", &target])
            .await
        {
            Ok(output) => output,
            Err(Error::CommandExit { stderr, exit_code, pod, command }) => {
                let answer = parse_safe_to_destroy(&stderr);
                if answer != SafeToDestroy::Unknown {
                    return Ok((answer, stderr));
                }
                return Err(Error::CommandExit {
                    exit_code,
                    pod,
                    command,
                    stderr,
                })
                .with_context(|| format!("unable to check if osd {} is safe to destroy", osd));
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("unable to check if osd {} is safe to destroy", osd))
            }
        };

        let answer = match parse_safe_to_destroy(&output.stderr) {
            SafeToDestroy::Unknown => parse_safe_to_destroy(&output.stdout),
            answer => answer,
        };
        if answer == SafeToDestroy::Unknown {
            warn!(osd, stderr = %output.stderr, stdout = %output.stdout, "Unrecognised safe-to-destroy output");
        }

        let text = [output.stderr.trim(), output.stdout.trim()]
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok((answer, text))
    }

    /// Wait until the cluster is healthy on several consecutive polls.
    ///
    /// `None` waits until cancelled. On timeout the error carries the last
    /// unhealthy message.
    pub async fn wait_for_health(&self, timeout: Option<Duration>) -> Result<()> {
        let config = &self.ctx.config;
        let required = config.health_confirmations.max(1);
        let pacer = Pacer::new(config.poll_interval(), timeout, self.ctx.cancel.clone());
        let mut status_failures = FailureBudget::new("fetch ceph status", config.max_consecutive_failures);
        let mut streak = 0;
        let mut last_message = String::new();

        self.ctx.progress.report("Waiting for Rook-Ceph to be healthy");

        let stopped = |interrupted: Interrupted, last: &str| {
            interrupted.into_error("rook to become healthy", Some(last.to_string()))
        };

        loop {
            let fetched = pacer
                .guard(self.fetch_status())
                .await
                .map_err(|i| stopped(i, &last_message))?;

            match fetched {
                Ok(status) => {
                    status_failures.success();
                    let (healthy, message) = is_healthy(&status);
                    if healthy {
                        streak += 1;
                        debug!(streak, required, "Ceph reported healthy");
                        if streak >= required {
                            return Ok(());
                        }
                    } else {
                        streak = 0;
                        last_message = message;
                        self.ctx.progress.report_transient(&progress_message(&status));
                    }
                }
                Err(e) => {
                    streak = 0;
                    status_failures.failure(e)?;
                }
            }

            pacer.tick().await.map_err(|i| stopped(i, &last_message))?;
        }
    }

    /// Wait until the cluster is healthy and Ceph reports `osd` safe to
    /// destroy, on several consecutive polls.
    ///
    /// Status and safety failures are budgeted separately. An unparseable
    /// safe-to-destroy answer counts as a safety failure.
    pub async fn wait_until_safe_to_remove(&self, osd: u32, timeout: Option<Duration>) -> Result<()> {
        let config = &self.ctx.config;
        let required = config.safe_confirmations.max(1);
        let pacer = Pacer::new(config.poll_interval(), timeout, self.ctx.cancel.clone());
        let mut status_failures = FailureBudget::new("fetch ceph status", config.max_consecutive_failures);
        let mut safety_failures =
            FailureBudget::new("check if the OSD is safe to destroy", config.max_consecutive_failures);
        let mut streak = 0;
        let mut last_message = String::new();

        let stopped = |interrupted: Interrupted, last: &str| {
            interrupted.into_error(format!("osd.{} to be safe to destroy", osd), Some(last.to_string()))
        };

        loop {
            let fetched = pacer
                .guard(self.fetch_status())
                .await
                .map_err(|i| stopped(i, &last_message))?;

            match fetched {
                Err(e) => {
                    streak = 0;
                    status_failures.failure(e)?;
                }
                Ok(status) => {
                    status_failures.success();
                    let (healthy, message) = is_healthy(&status);

                    if !healthy {
                        streak = 0;
                        last_message = message;
                        self.ctx.progress.report_transient(&progress_message(&status));
                    } else {
                        let checked = pacer
                            .guard(self.check_safe_to_remove(osd))
                            .await
                            .map_err(|i| stopped(i, &last_message))?;

                        match checked {
                            Ok((SafeToDestroy::Safe, _)) => {
                                safety_failures.success();
                                streak += 1;
                                last_message = format!("osd.{} is safe to destroy", osd);
                                if streak >= required {
                                    return Ok(());
                                }
                                self.ctx.progress.report_transient(&format!(
                                    "osd.{} is safe to destroy, confirming ({}/{})",
                                    osd, streak, required
                                ));
                            }
                            Ok((SafeToDestroy::Busy { pgs }, _)) => {
                                safety_failures.success();
                                streak = 0;
                                last_message = format!("{} PGs are still mapped to osd.{}", pgs, osd);
                                self.ctx.progress.report_transient(&format!(
                                    "Waiting for {} PGs to be moved off of osd.{} before removing it",
                                    pgs, osd
                                ));
                            }
                            Ok((SafeToDestroy::Unknown, output)) => {
                                streak = 0;
                                safety_failures.failure(Error::UnparseableOutput {
                                    command: format!("ceph osd safe-to-destroy osd.{}", osd),
                                    output,
                                })?;
                            }
                            Err(e) => {
                                streak = 0;
                                safety_failures.failure(e)?;
                            }
                        }
                    }
                }
            }

            pacer.tick().await.map_err(|i| stopped(i, &last_message))?;
        }
    }

    /// Wait until Ceph counts fewer OSDs up than it knows about
    pub async fn wait_until_one_device_down(&self, timeout: Option<Duration>) -> Result<()> {
        let config = &self.ctx.config;
        let pacer = Pacer::new(config.poll_interval(), timeout, self.ctx.cancel.clone());
        let mut status_failures = FailureBudget::new("fetch ceph status", config.max_consecutive_failures);

        let stopped = |interrupted: Interrupted| interrupted.into_error("an OSD to be marked down", None);

        loop {
            match pacer.guard(self.fetch_status()).await.map_err(stopped)? {
                Ok(status) => {
                    status_failures.success();
                    if status.total_osds() > status.up_osds() {
                        return Ok(());
                    }
                    self.ctx.progress.report_transient(&format!(
                        "Waiting for Ceph to mark an OSD down, {} of {} up",
                        status.up_osds(),
                        status.total_osds()
                    ));
                }
                Err(e) => status_failures.failure(e)?,
            }

            pacer.tick().await.map_err(stopped)?;
        }
    }
}
