//! Migration Configuration
//!
//! Names, selectors and timings for a Rook-Ceph installation. Defaults match
//! a stock Rook 1.0 install in the `rook-ceph` namespace.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the migration toolkit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RookConfig {
    /// Namespace Rook and Ceph run in
    pub namespace: String,
    /// Name of the CephCluster object
    pub cluster_name: String,

    /// Toolbox deployment name
    pub toolbox_deployment: String,
    /// Label selector matching toolbox pods
    pub toolbox_selector: String,
    /// Operator deployment name
    pub operator_deployment: String,
    /// Label selector matching operator pods
    pub operator_selector: String,

    /// Label selector matching OSD pods
    pub osd_selector: String,
    /// Pod label carrying the OSD number
    pub osd_id_label: String,
    /// OSD deployments are named `<prefix><num>`
    pub osd_deployment_prefix: String,
    /// Mount path that marks a directory-backed OSD
    pub legacy_mount_path: String,

    /// Interval between polls in every wait loop
    pub poll_interval_ms: u64,
    /// Consecutive polling failures tolerated before aborting
    pub max_consecutive_failures: u32,
    /// Upper bound on the number of block hosts required before removal
    pub max_block_hosts: usize,
    /// Consecutive healthy polls required by the health wait
    pub health_confirmations: u32,
    /// Consecutive healthy-and-safe polls required before removing an OSD
    pub safe_confirmations: u32,

    pub initial_health_timeout_secs: u64,
    pub toolbox_ready_timeout_secs: u64,
    pub scale_down_timeout_secs: u64,
    pub osd_down_timeout_secs: u64,
}

impl Default for RookConfig {
    fn default() -> Self {
        Self {
            namespace: "rook-ceph".to_string(),
            cluster_name: "rook-ceph".to_string(),

            toolbox_deployment: "rook-ceph-tools".to_string(),
            toolbox_selector: "app=rook-ceph-tools".to_string(),
            operator_deployment: "rook-ceph-operator".to_string(),
            operator_selector: "app=rook-ceph-operator".to_string(),

            osd_selector: "app=rook-ceph-osd".to_string(),
            osd_id_label: "ceph-osd-id".to_string(),
            osd_deployment_prefix: "rook-ceph-osd-".to_string(),
            legacy_mount_path: "/opt/replicated/rook".to_string(),

            poll_interval_ms: 1000,
            max_consecutive_failures: 5,
            max_block_hosts: 3,
            health_confirmations: 5,
            safe_confirmations: 3,

            initial_health_timeout_secs: 60,
            toolbox_ready_timeout_secs: 300,
            scale_down_timeout_secs: 600,
            osd_down_timeout_secs: 600,
        }
    }
}

impl RookConfig {
    /// Load a YAML config file; absent keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the wait loops spin or never abort
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Configuration("pollIntervalMs must be positive".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Configuration(
                "maxConsecutiveFailures must be positive".into(),
            ));
        }
        if self.max_block_hosts == 0 {
            return Err(Error::Configuration("maxBlockHosts must be positive".into()));
        }
        if self.namespace.is_empty() || self.cluster_name.is_empty() {
            return Err(Error::Configuration(
                "namespace and clusterName must be set".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_health_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_health_timeout_secs)
    }

    pub fn toolbox_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.toolbox_ready_timeout_secs)
    }

    pub fn scale_down_timeout(&self) -> Duration {
        Duration::from_secs(self.scale_down_timeout_secs)
    }

    pub fn osd_down_timeout(&self) -> Duration {
        Duration::from_secs(self.osd_down_timeout_secs)
    }

    /// Deployment name for an OSD number
    pub fn osd_deployment(&self, osd: u32) -> String {
        format!("{}{}", self.osd_deployment_prefix, osd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = RookConfig::default();
        config.validate().unwrap();
        assert_eq!(config.osd_deployment(7), "rook-ceph-osd-7");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "namespace: storage\nmaxBlockHosts: 2\npollIntervalMs: 250").unwrap();

        let config = RookConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.max_block_hosts, 2);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.cluster_name, "rook-ceph");
    }

    #[test]
    fn test_from_file_rejects_zero_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pollIntervalMs: 0").unwrap();

        assert!(matches!(
            RookConfig::from_file(file.path()),
            Err(Error::Configuration(_))
        ));
    }
}
