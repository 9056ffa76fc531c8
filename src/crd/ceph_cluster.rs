//! CephCluster CRD
//!
//! Minimal model of Rook's `ceph.rook.io/v1` CephCluster, covering only the
//! storage fields the migration reads or patches. Unknown fields are ignored
//! on decode so objects from any Rook release can be read.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// CephCluster CRD
// =============================================================================

/// CephCluster is owned by the Rook operator; this crate never creates one.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephCluster",
    plural = "cephclusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterSpec {
    /// Storage selection for OSDs
    #[serde(default)]
    pub storage: CephStorageSpec,
}

/// Storage section of a CephCluster spec
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephStorageSpec {
    /// Provision OSDs on every empty attached block device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_all_devices: Option<bool>,

    /// Provision OSDs on every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_all_nodes: Option<bool>,

    /// Legacy directory-backed OSDs (removed in later Rook releases)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<CephDirectory>>,
}

/// A host directory backing an OSD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephDirectory {
    pub path: String,
}
