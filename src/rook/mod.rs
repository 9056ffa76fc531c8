//! Rook-Ceph Hostpath to Block Migration
//!
//! Converts a running Ceph cluster from directory-backed OSDs to
//! block-device OSDs one OSD at a time, without downtime.
//!
//! ```text
//!   MigrationController
//!     ├── HealthMonitor ──┐
//!     ├── OsdInventory    │
//!     └── ClusterPatcher  │
//!                         ▼
//!                      Toolbox ──► ClusterApi (exec, deployments, pods)
//! ```

pub mod config;
pub mod health;
pub mod inventory;
pub mod migrate;
pub mod patcher;
pub mod status;
pub mod toolbox;
pub mod wait;

pub use config::RookConfig;
pub use health::{is_healthy, parse_safe_to_destroy, progress_message, HealthMonitor, SafeToDestroy};
pub use inventory::{DeviceKind, HostCounts, OsdInventory, StorageDevice};
pub use migrate::{
    has_sufficient_block_capacity, hostpath_to_osd, MigrationController, MigrationOutcome,
    RemovalStep,
};
pub use patcher::ClusterPatcher;
pub use status::{CephStatus, HealthStatus};
pub use toolbox::Toolbox;

use crate::domain::ports::{ClusterApiRef, ProgressSinkRef};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a migration component needs, passed explicitly at construction
#[derive(Clone)]
pub struct RookContext {
    pub api: ClusterApiRef,
    pub config: Arc<RookConfig>,
    pub progress: ProgressSinkRef,
    pub cancel: CancellationToken,
}

impl RookContext {
    pub fn new(
        api: ClusterApiRef,
        config: RookConfig,
        progress: ProgressSinkRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config: Arc::new(config),
            progress,
            cancel,
        }
    }
}
