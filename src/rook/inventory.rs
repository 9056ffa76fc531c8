//! OSD Inventory
//!
//! Lists OSD pods and classifies each as hostpath or block backed. An OSD is
//! hostpath backed when any of its containers mounts the legacy directory.

use crate::error::{Error, Result, ResultExt};
use crate::rook::RookContext;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;

/// Backing store of an OSD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Directory on the host filesystem
    Hostpath,
    /// Dedicated block device
    Block,
}

/// One running OSD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDevice {
    pub osd_id: u32,
    /// Host IP of the node running the OSD, or the node name if unset
    pub node: String,
    pub kind: DeviceKind,
}

/// Distinct hosts running at least one OSD of each kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCounts {
    pub hostpath_hosts: usize,
    pub block_hosts: usize,
}

/// Classify an OSD pod
pub fn classify_pod(pod: &Pod, id_label: &str, legacy_mount: &str) -> Result<StorageDevice> {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let raw_id = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(id_label))
        .cloned()
        .unwrap_or_default();
    let osd_id = raw_id.parse::<u32>().map_err(|_| Error::InvalidOsdLabel {
        pod: pod_name,
        value: raw_id.clone(),
    })?;

    let node = pod
        .status
        .as_ref()
        .and_then(|s| s.host_ip.clone())
        .filter(|ip| !ip.is_empty())
        .or_else(|| pod.spec.as_ref().and_then(|s| s.node_name.clone()))
        .unwrap_or_default();

    let hostpath = pod
        .spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .flat_map(|c| c.volume_mounts.iter().flatten())
        .any(|m| m.mount_path == legacy_mount);

    Ok(StorageDevice {
        osd_id,
        node,
        kind: if hostpath {
            DeviceKind::Hostpath
        } else {
            DeviceKind::Block
        },
    })
}

/// Count distinct hosts per device kind; several OSDs on one host count once
pub fn count_hosts(devices: &[StorageDevice]) -> HostCounts {
    let hosts = |kind: DeviceKind| {
        devices
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.node.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    };

    HostCounts {
        hostpath_hosts: hosts(DeviceKind::Hostpath),
        block_hosts: hosts(DeviceKind::Block),
    }
}

/// Number of block hosts to wait for before removing hostpath OSDs
pub fn desired_block_hosts(nodes: usize, max_block_hosts: usize) -> usize {
    nodes.min(max_block_hosts)
}

/// Read-only view of the OSDs in the cluster
#[derive(Clone)]
pub struct OsdInventory {
    ctx: RookContext,
}

impl OsdInventory {
    pub fn new(ctx: RookContext) -> Self {
        Self { ctx }
    }

    pub async fn list_devices(&self) -> Result<Vec<StorageDevice>> {
        let config = &self.ctx.config;
        let pods = self
            .ctx
            .api
            .list_pods(&config.namespace, &config.osd_selector)
            .await
            .context("unable to list OSD pods")?;

        pods.iter()
            .map(|pod| classify_pod(pod, &config.osd_id_label, &config.legacy_mount_path))
            .collect()
    }

    pub async fn count_distinct_hosts(&self) -> Result<HostCounts> {
        Ok(count_hosts(&self.list_devices().await?))
    }

    /// OSD numbers still backed by a host directory
    pub async fn legacy_device_numbers(&self) -> Result<Vec<u32>> {
        Ok(self
            .list_devices()
            .await?
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Hostpath)
            .map(|d| d.osd_id)
            .collect())
    }

    pub async fn count_nodes(&self) -> Result<usize> {
        let nodes = self
            .ctx
            .api
            .list_nodes()
            .await
            .context("unable to list nodes")?;
        Ok(nodes.len())
    }
}
