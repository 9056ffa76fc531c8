//! Rook-Ceph Hostpath to Block Migration
//!
//! Migrates a live Rook-Ceph cluster from directory-backed OSDs to
//! block-device OSDs, one OSD at a time, without taking storage offline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      MigrationController                         │
//! │   reweight → wait safe → scale down → wait down → purge          │
//! ├──────────────────┬──────────────────┬────────────────────────────┤
//! │  HealthMonitor   │   OsdInventory   │      ClusterPatcher        │
//! │  (ceph status,   │   (OSD pods,     │   (CephCluster JSON patch, │
//! │   safe-to-       │    host counts)  │    operator restart)       │
//! │   destroy)       │                  │                            │
//! ├──────────────────┴──────────────────┴────────────────────────────┤
//! │                  Toolbox (rook-ceph-tools exec)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │            ClusterApi port  ──►  KubeClusterApi (kube-rs)        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`rook`]: Migration controller, health monitor, inventory and toolbox
//! - [`cluster`]: Kubernetes adapter for the cluster port
//! - [`crd`]: Custom Resource Definitions owned by Rook
//! - [`domain`]: Ports the migration is written against
//! - [`progress`]: Human-readable progress sinks
//! - [`error`]: Error types and handling

pub mod cluster;
pub mod crd;
pub mod domain;
pub mod error;
pub mod progress;
pub mod rook;

// Re-export commonly used types
pub use cluster::KubeClusterApi;

pub use crd::{CephCluster, CephClusterSpec, CephStorageSpec};

pub use domain::ports::{ClusterApi, ClusterApiRef, ExecOutput, ProgressSink, ProgressSinkRef};

pub use error::{Error, ErrorCategory, Result, ResultExt};

pub use progress::{RecordingProgress, TerminalProgress, TracingProgress};

pub use rook::{
    has_sufficient_block_capacity, hostpath_to_osd, CephStatus, HealthMonitor, HealthStatus,
    MigrationController, MigrationOutcome, RookConfig, RookContext, SafeToDestroy, Toolbox,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
