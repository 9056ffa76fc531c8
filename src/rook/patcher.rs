//! CephCluster Patcher
//!
//! Switches the CephCluster from directory-backed storage to consuming every
//! attached block device, and nudges the operator to notice.

use crate::error::{Result, ResultExt};
use crate::rook::inventory::OsdInventory;
use crate::rook::RookContext;
use json_patch::Patch;
use serde_json::json;
use tracing::{info, warn};

/// Decode patch operations; a malformed operation is an error, never an
/// empty patch
fn build_patch(operations: serde_json::Value) -> Result<Patch> {
    serde_json::from_value(operations).context("unable to build json patch")
}

/// JSON patch setting a deployment's desired replica count
pub fn replicas_patch(replicas: i32) -> Result<Patch> {
    build_patch(json!([
        {"op": "replace", "path": "/spec/replicas", "value": replicas}
    ]))
}

/// JSON patch turning on `useAllDevices`
pub fn use_all_devices_patch() -> Result<Patch> {
    build_patch(json!([
        {"op": "replace", "path": "/spec/storage/useAllDevices", "value": true}
    ]))
}

/// JSON patch dropping the directory storage declaration
pub fn remove_directories_patch() -> Result<Patch> {
    build_patch(json!([
        {"op": "remove", "path": "/spec/storage/directories"}
    ]))
}

/// Mutates the CephCluster object and the Rook operator
pub struct ClusterPatcher {
    ctx: RookContext,
}

impl ClusterPatcher {
    pub fn new(ctx: RookContext) -> Self {
        Self { ctx }
    }

    /// Turn on block device provisioning.
    ///
    /// Enabling `useAllDevices` must succeed. Removing the `directories`
    /// list is attempted afterwards and any failure is only reported, since
    /// the field may already be gone.
    pub async fn enable_block_provisioning(&self) -> Result<()> {
        let config = &self.ctx.config;

        self.ctx
            .api
            .patch_ceph_cluster(&config.namespace, &config.cluster_name, &use_all_devices_patch()?)
            .await
            .context("unable to patch cephcluster")?;
        info!(cluster = %config.cluster_name, "Enabled useAllDevices");

        let removed = match remove_directories_patch() {
            Ok(patch) => {
                self.ctx
                    .api
                    .patch_ceph_cluster(&config.namespace, &config.cluster_name, &patch)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = removed {
            warn!(cluster = %config.cluster_name, error = %e, "Unable to remove storage directories");
            self.ctx.progress.report(&format!(
                "Got error {} when disabling hostpath storage, but continuing anyways",
                e
            ));
        }

        Ok(())
    }

    /// Restart the operator when no block OSD exists yet, so it re-reads the
    /// CephCluster now rather than on its next resync
    pub async fn ensure_controller_picks_up_config(&self, inventory: &OsdInventory) -> Result<()> {
        let hosts = inventory.count_distinct_hosts().await?;
        if hosts.block_hosts > 0 {
            return Ok(());
        }

        let config = &self.ctx.config;
        self.ctx.progress.report("Restarting the rook-ceph operator to ensure modified settings take effect immediately");
        self.ctx
            .api
            .delete_pods(&config.namespace, &config.operator_selector)
            .await
            .context("unable to restart rook-ceph-operator")
    }
}
