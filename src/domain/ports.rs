//! Domain Ports - Core trait definitions for the migration toolkit
//!
//! These traits define the boundaries between the migration logic and the
//! systems it drives. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use json_patch::Patch;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Remote Command Execution
// =============================================================================

/// Result of a command executed inside a pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Process exit code, 0 on success
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ExecOutput {
    /// A successful execution with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

// =============================================================================
// Cluster API Port
// =============================================================================

/// Port for the orchestration API operations the migration relies on.
///
/// Implementations are expected to be already authenticated. Label selectors
/// use the Kubernetes `key=value` syntax.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a deployment, `None` if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Create a deployment
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()>;

    /// Apply a JSON patch to a deployment
    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Patch) -> Result<()>;

    /// Delete a deployment
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    /// Delete every pod matching a label selector
    async fn delete_pods(&self, namespace: &str, selector: &str) -> Result<()>;

    /// List all nodes in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Apply a JSON patch to a CephCluster object
    async fn patch_ceph_cluster(&self, namespace: &str, name: &str, patch: &Patch) -> Result<()>;

    /// Run a command in a container and capture its output.
    ///
    /// A non-zero exit code is reported through [`ExecOutput::exit_code`],
    /// not as an error; errors are reserved for transport failures.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;
}

// =============================================================================
// Progress Sink Port
// =============================================================================

/// Port for human-readable progress output
pub trait ProgressSink: Send + Sync {
    /// Write a permanent line
    fn report(&self, line: &str);

    /// Write a line that the next transient line replaces in place
    fn report_transient(&self, line: &str);
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterApiRef = Arc<dyn ClusterApi>;
pub type ProgressSinkRef = Arc<dyn ProgressSink>;
