//! Hostpath to Block Migration Controller
//!
//! Moves a Rook-Ceph cluster off directory-backed OSDs:
//!
//! 1. make sure the toolbox runs and Ceph is healthy
//! 2. stop if no hostpath OSD is left
//! 3. turn on `useAllDevices` and wait for block OSDs on enough hosts
//! 4. remove each hostpath OSD in turn, see [`RemovalStep`]
//!
//! Exactly one OSD is ever being removed. Any failure aborts the whole run
//! and leaves the cluster at its last verified step; running again picks up
//! from whatever hostpath OSDs remain.

use crate::error::{Result, ResultExt};
use crate::rook::health::HealthMonitor;
use crate::rook::inventory::{desired_block_hosts, OsdInventory};
use crate::rook::patcher::{replicas_patch, ClusterPatcher};
use crate::rook::toolbox::Toolbox;
use crate::rook::wait::{await_deployment_scale, FailureBudget, Interrupted, Pacer};
use crate::rook::RookContext;
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument};

/// One stage of removing a single hostpath OSD, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalStep {
    /// Weight the OSD to 0 so Ceph starts moving data off it
    Reweight,
    /// Wait for the data to move and the cluster to settle
    WaitSafePre,
    /// Scale the OSD deployment to 0
    ScaleDown,
    /// Wait for the deployment to report 0 replicas
    ConfirmScaled,
    /// Wait for Ceph to notice the OSD is down
    WaitDeviceDown,
    /// Re-check health and safety after the OSD went away
    WaitSafePost,
    /// `ceph osd purge`
    Purge,
    /// Delete the zero-replica deployment
    Cleanup,
}

impl RemovalStep {
    pub const SEQUENCE: [RemovalStep; 8] = [
        RemovalStep::Reweight,
        RemovalStep::WaitSafePre,
        RemovalStep::ScaleDown,
        RemovalStep::ConfirmScaled,
        RemovalStep::WaitDeviceDown,
        RemovalStep::WaitSafePost,
        RemovalStep::Purge,
        RemovalStep::Cleanup,
    ];
}

impl std::fmt::Display for RemovalStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemovalStep::Reweight => "reweight",
            RemovalStep::WaitSafePre => "wait-safe-pre",
            RemovalStep::ScaleDown => "scale-down",
            RemovalStep::ConfirmScaled => "confirm-scaled",
            RemovalStep::WaitDeviceDown => "wait-device-down",
            RemovalStep::WaitSafePost => "wait-safe-post",
            RemovalStep::Purge => "purge",
            RemovalStep::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Result of a successful migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No hostpath OSD existed
    NotRequired,
    /// These OSDs were purged, in order
    Completed { removed: Vec<u32> },
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Drives the migration; holds no state between runs
pub struct MigrationController {
    ctx: RookContext,
    toolbox: Toolbox,
    monitor: HealthMonitor,
    inventory: OsdInventory,
    patcher: ClusterPatcher,
}

impl MigrationController {
    pub fn new(ctx: RookContext) -> Self {
        let toolbox = Toolbox::new(ctx.clone());
        Self {
            monitor: HealthMonitor::new(ctx.clone(), toolbox.clone()),
            inventory: OsdInventory::new(ctx.clone()),
            patcher: ClusterPatcher::new(ctx.clone()),
            toolbox,
            ctx,
        }
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    fn report(&self, line: &str) {
        self.ctx.progress.report(line);
    }

    /// Run the migration to completion
    pub async fn run(&self) -> Result<MigrationOutcome> {
        let config = &self.ctx.config;
        self.report("Adding blockdevice-based Rook OSDs and removing all Hostpath-based OSDs to allow upgrading Rook");

        self.toolbox
            .ensure_ready()
            .await
            .context("unable to start rook-ceph-tools before starting migration")?;

        self.monitor
            .wait_for_health(Some(config.initial_health_timeout()))
            .await
            .with_context(|| {
                format!(
                    "rook failed to become healthy within {}s, aborting migration",
                    config.initial_health_timeout_secs
                )
            })?;

        self.report("Rook is currently healthy, checking if a migration from directory-based storage is required");
        let hosts = self
            .inventory
            .count_distinct_hosts()
            .await
            .context("failed to determine how many OSDs needed migration")?;
        if hosts.hostpath_hosts == 0 {
            self.report("No directory OSDs exist, and so no migration is required.");
            return Ok(MigrationOutcome::NotRequired);
        }
        self.report(&format!(
            "{} nodes with directory OSDs exist, and {} nodes with block-based OSDs. Continuing with migration.",
            hosts.hostpath_hosts, hosts.block_hosts
        ));

        self.report("Disabling directory storage and enabling block OSDs");
        self.patcher
            .enable_block_provisioning()
            .await
            .context("unable to enable ceph block devices")?;
        self.patcher
            .ensure_controller_picks_up_config(&self.inventory)
            .await
            .context("failed to restart rook-ceph operator after patching ceph spec")?;

        self.report("Waiting for required block device OSDs to be added to the cluster");
        self.wait_for_block_capacity()
            .await
            .context("failed to wait for block device OSDs to be added")?;

        self.report("Determining the list of hostpath OSDs to migrate");
        let mut osds = self
            .inventory
            .legacy_device_numbers()
            .await
            .context("failed to get the current list of OSDs")?;
        osds.sort_unstable();

        let names: Vec<String> = osds.iter().map(|osd| format!("osd.{}", osd)).collect();
        self.report(&format!("Removing hostpath OSDs {} from the cluster", names.join(", ")));

        for &osd in &osds {
            self.remove_osd(osd)
                .await
                .with_context(|| format!("failed to safely remove OSD {}", osd))?;
        }

        self.report("Migration completed successfully!");
        Ok(MigrationOutcome::Completed { removed: osds })
    }

    /// Whether enough hosts run block OSDs to start removing hostpath ones
    pub async fn has_sufficient_block_capacity(&self) -> Result<bool> {
        let nodes = self.inventory.count_nodes().await?;
        let desired = desired_block_hosts(nodes, self.ctx.config.max_block_hosts);
        let hosts = self
            .inventory
            .count_distinct_hosts()
            .await
            .context("unable to count OSDs")?;
        Ok(hosts.block_hosts >= desired)
    }

    /// Wait, until cancelled, for block OSDs on `min(nodes, max_block_hosts)`
    /// distinct hosts
    async fn wait_for_block_capacity(&self) -> Result<()> {
        let config = &self.ctx.config;
        let nodes = self.inventory.count_nodes().await?;
        let desired = desired_block_hosts(nodes, config.max_block_hosts);

        let pacer = Pacer::new(config.poll_interval(), None, self.ctx.cancel.clone());
        let mut failures = FailureBudget::new("count rook OSDs", config.max_consecutive_failures);
        let mut have = 0;

        let stopped = |interrupted: Interrupted, have: usize| {
            interrupted.into_error(format!("sufficient block OSDs, have {} of {}", have, desired), None)
        };

        loop {
            let counted = pacer
                .guard(self.inventory.count_distinct_hosts())
                .await
                .map_err(|i| stopped(i, have))?;

            match counted {
                Ok(hosts) => {
                    failures.success();
                    have = hosts.block_hosts;
                    if have >= desired {
                        info!(have, desired, "Sufficient block device OSDs");
                        return Ok(());
                    }
                }
                Err(e) => failures.failure(e)?,
            }

            self.ctx.progress.report_transient(&format!(
                "Waiting for block device OSDs to be added to the cluster on {} nodes, have {}",
                desired, have
            ));

            pacer.tick().await.map_err(|i| stopped(i, have))?;
        }
    }

    /// Take one hostpath OSD out of the cluster, step by step
    #[instrument(skip(self))]
    pub async fn remove_osd(&self, osd: u32) -> Result<()> {
        for step in RemovalStep::SEQUENCE {
            info!(osd, %step, "Starting removal step");
            self.run_step(osd, step).await?;
        }

        self.report(&format!("Successfully purged osd.{}", osd));
        Ok(())
    }

    async fn run_step(&self, osd: u32, step: RemovalStep) -> Result<()> {
        let config = &self.ctx.config;
        let deployment = config.osd_deployment(osd);
        let target = format!("osd.{}", osd);

        match step {
            RemovalStep::Reweight => {
                self.report(&format!("Reweighting {} to 0", target));
                self.toolbox
                    .run(&["ceph", "osd", "reweight", &target, "0"])
                    .await
                    .with_context(|| format!("failed to run 'ceph osd reweight {} 0'", target))?;
            }
            RemovalStep::WaitSafePre => {
                self.report(&format!(
                    "Waiting for health to stabilize and data to migrate after reweighting {}",
                    target
                ));
                self.monitor
                    .wait_until_safe_to_remove(osd, None)
                    .await
                    .with_context(|| {
                        format!("failed to wait for rook to become healthy after reweighting osd {}", osd)
                    })?;
            }
            RemovalStep::ScaleDown => {
                self.report(&format!("Scaling down {} deployment at {}", target, timestamp()));
                self.ctx
                    .api
                    .patch_deployment(&config.namespace, &deployment, &replicas_patch(0)?)
                    .await
                    .with_context(|| format!("failed to scale down {} deployment", deployment))?;
            }
            RemovalStep::ConfirmScaled => {
                await_deployment_scale(&self.ctx, &deployment, 0, config.scale_down_timeout())
                    .await
                    .with_context(|| {
                        format!("failed to wait for the {} deployment to scale down", deployment)
                    })?;
            }
            RemovalStep::WaitDeviceDown => {
                self.report(&format!("Waiting for osd to be down at {}", timestamp()));
                self.monitor
                    .wait_until_one_device_down(Some(config.osd_down_timeout()))
                    .await
                    .context("failed to wait for an OSD to be marked down after scale down")?;
                self.report(&format!("Removed osd was marked out by Rook at {}", timestamp()));
            }
            RemovalStep::WaitSafePost => {
                self.monitor
                    .wait_until_safe_to_remove(osd, None)
                    .await
                    .with_context(|| {
                        format!("failed to wait for rook to become healthy after scaling down osd {}", osd)
                    })?;
            }
            RemovalStep::Purge => {
                self.report(&format!(
                    "Purging hostpath {} as all data has been migrated to other devices",
                    target
                ));
                let id = osd.to_string();
                self.toolbox
                    .run(&["ceph", "osd", "purge", &id, "--yes-i-really-mean-it"])
                    .await
                    .with_context(|| {
                        format!("failed to run 'ceph osd purge {} --yes-i-really-mean-it'", osd)
                    })?;
            }
            RemovalStep::Cleanup => {
                self.ctx
                    .api
                    .delete_deployment(&config.namespace, &deployment)
                    .await
                    .with_context(|| format!("failed to delete deployment for osd {}", osd))?;
            }
        }

        Ok(())
    }
}

/// Migrate every hostpath OSD to block storage
pub async fn hostpath_to_osd(ctx: RookContext) -> Result<MigrationOutcome> {
    MigrationController::new(ctx).run().await
}

/// Whether block OSDs run on `min(nodes, max_block_hosts)` distinct hosts
pub async fn has_sufficient_block_capacity(ctx: RookContext) -> Result<bool> {
    MigrationController::new(ctx).has_sufficient_block_capacity().await
}
