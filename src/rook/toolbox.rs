//! Toolbox Gateway
//!
//! All Ceph administrative commands run inside the `rook-ceph-tools` pod.
//! The toolbox is started on demand from the image the Rook operator runs,
//! scaled back up if someone scaled it to zero, and never scaled down here.

use crate::domain::ports::ExecOutput;
use crate::error::{Error, Result, ResultExt};
use crate::rook::patcher::replicas_patch;
use crate::rook::wait::await_deployment_scale;
use crate::rook::RookContext;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info};

const TOOLBOX_TEMPLATE: &str = include_str!("toolbox.yaml");

/// Gateway for running commands in the Ceph toolbox
#[derive(Clone)]
pub struct Toolbox {
    ctx: RookContext,
}

impl Toolbox {
    pub fn new(ctx: RookContext) -> Self {
        Self { ctx }
    }

    /// Make sure exactly one toolbox replica is up. Idempotent.
    pub async fn ensure_ready(&self) -> Result<()> {
        let config = &self.ctx.config;
        let name = &config.toolbox_deployment;

        let existing = self
            .ctx
            .api
            .get_deployment(&config.namespace, name)
            .await
            .context("unable to determine rook-ceph-tools deployment status")?;

        if let Some(existing) = existing {
            let ready = existing
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            if ready > 0 {
                return Ok(());
            }

            info!(deployment = %name, "Scaling up toolbox");
            self.ctx
                .api
                .patch_deployment(&config.namespace, name, &replicas_patch(1)?)
                .await
                .context("unable to scale up rook-ceph-tools deployment")?;

            return await_deployment_scale(&self.ctx, name, 1, config.toolbox_ready_timeout())
                .await
                .context("unable to wait for rook-ceph-tools to scale up");
        }

        self.ctx
            .progress
            .report("The rook-ceph-toolbox deployment does not exist, starting it");

        let image = self
            .operator_image()
            .await
            .context("unable to determine rook-ceph-operator image")?;
        let deployment = toolbox_deployment(&config.namespace, name, &image)?;

        self.ctx
            .api
            .create_deployment(&config.namespace, &deployment)
            .await
            .context("unable to create rook-ceph-tools deployment")?;

        self.ctx.progress.report("Waiting for rook-ceph-toolbox to start");
        await_deployment_scale(&self.ctx, name, 1, config.toolbox_ready_timeout())
            .await
            .context("unable to wait for rook-ceph-tools to scale up")?;

        self.ctx.progress.report("Started rook-ceph-toolbox deployment");
        Ok(())
    }

    /// Image of the first container of the Rook operator deployment
    async fn operator_image(&self) -> Result<String> {
        let config = &self.ctx.config;
        let operator = self
            .ctx
            .api
            .get_deployment(&config.namespace, &config.operator_deployment)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Deployment".into(),
                name: format!("{}/{}", config.namespace, config.operator_deployment),
            })?;

        operator
            .spec
            .and_then(|s| s.template.spec)
            .and_then(|s| s.containers.into_iter().next())
            .and_then(|c| c.image)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "deployment {} has no container image",
                    config.operator_deployment
                ))
            })
    }

    /// Run a command in the toolbox pod.
    ///
    /// A non-zero exit becomes [`Error::CommandExit`] carrying stderr; a
    /// failure to reach the pod stays a transport error. Cancelling the
    /// context abandons a command that is still running.
    pub async fn run(&self, command: &[&str]) -> Result<ExecOutput> {
        let config = &self.ctx.config;
        let pretty = command.join(" ");

        let pods = self
            .ctx
            .api
            .list_pods(&config.namespace, &config.toolbox_selector)
            .await
            .context("unable to find rook-ceph-tools pod")?;

        if pods.len() != 1 {
            return Err(Error::RunnerPods {
                count: pods.len(),
                names: pods
                    .iter()
                    .filter_map(|p| p.metadata.name.clone())
                    .collect(),
            });
        }

        let pod = &pods[0];
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let container = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::Internal(format!("pod {} has no containers", pod_name)))?;

        debug!(pod = %pod_name, command = %pretty, "Running toolbox command");
        let argv: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let output = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                return Err(Error::Cancelled {
                    operation: format!("'{}' to finish", pretty),
                })
            }
            output = self.ctx.api.exec(&config.namespace, &pod_name, &container, &argv) => output?,
        };

        if output.exit_code != 0 {
            return Err(Error::CommandExit {
                exit_code: output.exit_code,
                pod: pod_name,
                command: pretty,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }
}

/// Build the toolbox deployment from the bundled template
fn toolbox_deployment(namespace: &str, name: &str, image: &str) -> Result<Deployment> {
    let mut deployment: Deployment = serde_yaml::from_str(TOOLBOX_TEMPLATE)
        .context("unable to parse static toolbox yaml")?;

    deployment.metadata.name = Some(name.to_string());
    deployment.metadata.namespace = Some(namespace.to_string());

    let container = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|s| s.containers.first_mut())
        .ok_or_else(|| Error::Internal("toolbox template has no container".into()))?;
    container.image = Some(image.to_string());

    Ok(deployment)
}
