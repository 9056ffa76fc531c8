//! Kubernetes Cluster Adapter
//!
//! Implements [`ClusterApi`] on top of a `kube::Client`. The client is built
//! once by the caller and passed in; nothing here caches configuration.

use crate::crd::CephCluster;
use crate::domain::ports::{ClusterApi, ExecOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use json_patch::Patch as JsonPatch;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap an authenticated client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployments(namespace).get_opt(name).await?)
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &JsonPatch) -> Result<()> {
        debug!(namespace, name, "Patching deployment");
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch.clone()))
            .await?;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pods.items)
    }

    async fn delete_pods(&self, namespace: &str, selector: &str) -> Result<()> {
        self.pods(namespace)
            .delete_collection(
                &DeleteParams::default(),
                &ListParams::default().labels(selector),
            )
            .await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }

    async fn patch_ceph_cluster(&self, namespace: &str, name: &str, patch: &JsonPatch) -> Result<()> {
        debug!(namespace, name, "Patching cephcluster");
        let clusters: Api<CephCluster> = Api::namespaced(self.client.clone(), namespace);
        clusters
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch.clone()))
            .await?;
        Ok(())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let pretty = command.join(" ");
        let transport = |reason: String| Error::Exec {
            command: pretty.clone(),
            pod: pod.to_string(),
            reason,
        };

        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods(namespace)
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| transport(e.to_string()))?;

        let stdout = attached
            .stdout()
            .ok_or_else(|| transport("stdout stream unavailable".into()))?;
        let stderr = attached
            .stderr()
            .ok_or_else(|| transport("stderr stream unavailable".into()))?;
        let status = attached.take_status();

        let (stdout, stderr) = futures::try_join!(drain(stdout), drain(stderr))
            .map_err(|e| transport(e.to_string()))?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let exit_code = exit_code_from_status(status.as_ref()).map_err(transport)?;

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf).await?;
    Ok(buf)
}

/// Recover the process exit code from the status the API server sends on the
/// error channel when an exec session ends.
fn exit_code_from_status(status: Option<&Status>) -> std::result::Result<i32, String> {
    let Some(status) = status else {
        return Ok(0);
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|c| c.reason.as_deref() == Some("ExitCode"))
            })
            .and_then(|c| c.message.as_deref())
            .and_then(|m| m.trim().parse::<i32>().ok());

        return code.ok_or_else(|| "non-zero exit without an exit code".to_string());
    }

    Err(status
        .message
        .clone()
        .unwrap_or_else(|| "exec failed without a status message".to_string()))
}
