//! Ceph Status Types
//!
//! Decoded output of `ceph status --format json-pretty`. Only the fields the
//! health checks consume are modelled; everything else is ignored on decode.
//! Ceph omits the ratio and recovery fields entirely when they are zero, so
//! they all default.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall health reported by the monitors.
///
/// Values other than the three documented ones are kept verbatim so the
/// health message shows exactly what Ceph said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HealthStatus {
    Ok,
    Warn,
    Err,
    Other(String),
}

/// Used when `ceph status` omits the field entirely
impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Other("HEALTH_UNKNOWN".into())
    }
}

impl From<String> for HealthStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "HEALTH_OK" => HealthStatus::Ok,
            "HEALTH_WARN" => HealthStatus::Warn,
            "HEALTH_ERR" => HealthStatus::Err,
            _ => HealthStatus::Other(raw),
        }
    }
}

impl From<HealthStatus> for String {
    fn from(status: HealthStatus) -> Self {
        status.to_string()
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "HEALTH_OK"),
            HealthStatus::Warn => write!(f, "HEALTH_WARN"),
            HealthStatus::Err => write!(f, "HEALTH_ERR"),
            HealthStatus::Other(raw) => f.write_str(raw),
        }
    }
}

/// A single health check raised by the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub summary: HealthCheckSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckSummary {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default)]
    pub checks: BTreeMap<String, HealthCheck>,
}

/// OSD counts, nested one level deeper than you would expect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsdMapWrapper {
    #[serde(default)]
    pub osdmap: OsdMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsdMap {
    #[serde(default)]
    pub epoch: u64,
    #[serde(default)]
    pub num_osds: u32,
    #[serde(default)]
    pub num_up_osds: u32,
    #[serde(default)]
    pub num_in_osds: u32,
    #[serde(default)]
    pub num_remapped_pgs: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PgStateCount {
    pub state_name: String,
    pub count: u32,
}

/// Placement group summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PgMap {
    pub pgs_by_state: Vec<PgStateCount>,
    pub num_pgs: u32,
    pub num_pools: u32,
    pub num_objects: u64,
    pub inactive_pgs_ratio: f64,
    pub degraded_ratio: f64,
    pub misplaced_ratio: f64,
    pub recovering_bytes_per_sec: u64,
}

/// A long-running task tracked by the mgr progress module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: f64,
}

/// Snapshot of `ceph status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CephStatus {
    #[serde(default)]
    pub fsid: String,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub osdmap: OsdMapWrapper,
    #[serde(default)]
    pub pgmap: PgMap,
    #[serde(default)]
    pub progress_events: BTreeMap<String, ProgressEvent>,
}

impl CephStatus {
    /// Decode the JSON printed by `ceph status --format json-pretty`
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of OSDs known to the cluster
    pub fn total_osds(&self) -> u32 {
        self.osdmap.osdmap.num_osds
    }

    /// Number of OSDs currently reporting up
    pub fn up_osds(&self) -> u32 {
        self.osdmap.osdmap.num_up_osds
    }

    /// Count of placement groups in the given state
    pub fn pgs_in_state(&self, state: &str) -> u32 {
        self.pgmap
            .pgs_by_state
            .iter()
            .filter(|s| s.state_name == state)
            .map(|s| s.count)
            .sum()
    }
}
