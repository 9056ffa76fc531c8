//! In-memory cluster for unit tests
//!
//! Models just enough of Kubernetes and Ceph for the migration to run end to
//! end: deployments converge to their desired replica count, scaling a
//! deployment to zero removes its pods, `ceph status` reports OSDs without a
//! pod as down, and `ceph osd purge` forgets the OSD. Individual exec
//! responses can be scripted per command to drive unhappy paths.

use crate::domain::ports::{ClusterApi, ExecOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use json_patch::Patch;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    Container, Node, Pod, PodSpec, PodStatus, PodTemplateSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub const NAMESPACE: &str = "rook-ceph";
pub const LEGACY_MOUNT: &str = "/opt/replicated/rook";

// =============================================================================
// Object Builders
// =============================================================================

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// An OSD pod as Rook 1.0 creates it
pub fn osd_pod(id: u32, host: &str, hostpath: bool) -> Pod {
    let mut mounts = vec![VolumeMount {
        name: "rook-data".into(),
        mount_path: "/var/lib/rook".into(),
        ..Default::default()
    }];
    if hostpath {
        mounts.push(VolumeMount {
            name: "rook-ceph-osd-dir".into(),
            mount_path: LEGACY_MOUNT.into(),
            ..Default::default()
        });
    } else {
        mounts.push(VolumeMount {
            name: "devices".into(),
            mount_path: "/dev".into(),
            ..Default::default()
        });
    }

    let id_str = id.to_string();
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("rook-ceph-osd-{}-7c9f8d5b4-x2k9p", id)),
            namespace: Some(NAMESPACE.into()),
            labels: Some(labels(&[("app", "rook-ceph-osd"), ("ceph-osd-id", &id_str)])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "osd".into(),
                image: Some("rook/ceph:v1.0.4".into()),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            host_ip: Some(host.into()),
            ..Default::default()
        }),
    }
}

/// A deployment owning pods that match `pod`'s labels
pub fn deployment_for(name: &str, pod: &Pod, replicas: i32) -> Deployment {
    let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(NAMESPACE.into()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: pod.spec.clone(),
            },
            ..Default::default()
        }),
        status: Some(converged(replicas)),
    }
}

fn converged(replicas: i32) -> DeploymentStatus {
    DeploymentStatus {
        replicas: Some(replicas),
        ready_replicas: Some(replicas),
        available_replicas: Some(replicas),
        updated_replicas: Some(replicas),
        ..Default::default()
    }
}

fn operator_pod(image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("rook-ceph-operator-6d9c4c7b8-lq4z2".into()),
            namespace: Some(NAMESPACE.into()),
            labels: Some(labels(&[("app", "rook-ceph-operator")])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "rook-ceph-operator".into(),
                image: Some(image.into()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus::default()),
    }
}

pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => pod_labels.get(k).map(String::as_str) == Some(v),
            None => pod_labels.contains_key(term),
        })
}

fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Fake Cluster
// =============================================================================

pub struct FakeState {
    pub deployments: BTreeMap<String, Deployment>,
    pub pods: Vec<Pod>,
    pub nodes: Vec<Node>,
    pub ceph_cluster: serde_json::Value,
    /// OSD numbers Ceph knows about
    pub ceph_osds: BTreeSet<u32>,
    /// Block OSDs the operator creates once `useAllDevices` is on
    pub block_osds_on_enable: Vec<(u32, String)>,
    pub scripted_exec: BTreeMap<String, VecDeque<Result<ExecOutput>>>,
    /// Mutations and commands in the order they happened
    pub calls: Vec<String>,
    /// Deployments report their desired scale immediately
    pub auto_rollout: bool,
    pub base_status: serde_json::Value,
    /// Outcomes of the next pod listings, `true` fails the call; once
    /// drained listings succeed
    pub pod_list_failures: VecDeque<bool>,
    /// Every exec call blocks forever, like a stalled websocket
    pub hang_exec: bool,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let base_status: serde_json::Value =
            serde_json::from_str(include_str!("../rook/testdata/healthy.json"))
                .expect("fixture is valid json");

        Self {
            state: Mutex::new(FakeState {
                deployments: BTreeMap::new(),
                pods: Vec::new(),
                nodes: Vec::new(),
                ceph_cluster: serde_json::json!({
                    "spec": {
                        "storage": {
                            "useAllNodes": true,
                            "useAllDevices": false,
                            "directories": [{"path": LEGACY_MOUNT}]
                        }
                    }
                }),
                ceph_osds: BTreeSet::new(),
                block_osds_on_enable: Vec::new(),
                scripted_exec: BTreeMap::new(),
                calls: Vec::new(),
                auto_rollout: true,
                base_status,
                pod_list_failures: VecDeque::new(),
                hang_exec: false,
            }),
        }
    }

    pub fn with_nodes(self, names: &[&str]) -> Self {
        self.state.lock().nodes = names.iter().map(|n| node(n)).collect();
        self
    }

    pub fn with_operator(self, image: &str) -> Self {
        {
            let mut state = self.state.lock();
            let pod = operator_pod(image);
            state
                .deployments
                .insert("rook-ceph-operator".into(), deployment_for("rook-ceph-operator", &pod, 1));
            state.pods.push(pod);
        }
        self
    }

    pub fn with_osd(self, id: u32, host: &str, hostpath: bool) -> Self {
        add_osd(&mut self.state.lock(), id, host, hostpath);
        self
    }

    pub fn with_block_osds_on_enable(self, osds: &[(u32, &str)]) -> Self {
        self.state.lock().block_osds_on_enable =
            osds.iter().map(|(id, host)| (*id, host.to_string())).collect();
        self
    }

    /// Add a running toolbox deployment and pod
    pub fn with_toolbox(self) -> Self {
        {
            let mut state = self.state.lock();
            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some("rook-ceph-tools-5b9d6f8c9-pm7tq".into()),
                    namespace: Some(NAMESPACE.into()),
                    labels: Some(labels(&[("app", "rook-ceph-tools")])),
                    ..Default::default()
                },
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "rook-ceph-tools".into(),
                        image: Some("rook/ceph:v1.0.4".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                status: Some(PodStatus::default()),
            };
            state
                .deployments
                .insert("rook-ceph-tools".into(), deployment_for("rook-ceph-tools", &pod, 1));
            state.pods.push(pod);
        }
        self
    }

    /// Script pod listings: `true` fails the call, `false` lets it through
    pub fn fail_pod_lists(&self, outcomes: &[bool]) {
        self.state.lock().pod_list_failures.extend(outcomes);
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        self.state.lock().pods.push(pod);
        self
    }

    /// Queue responses for a command; once drained the default behaviour applies
    pub fn script_exec(&self, command: &str, responses: Vec<Result<ExecOutput>>) {
        self.state
            .lock()
            .scripted_exec
            .entry(command.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls starting with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }
}

fn add_osd(state: &mut FakeState, id: u32, host: &str, hostpath: bool) {
    let pod = osd_pod(id, host, hostpath);
    let name = format!("rook-ceph-osd-{}", id);
    state.deployments.insert(name.clone(), deployment_for(&name, &pod, 1));
    state.pods.push(pod);
    state.ceph_osds.insert(id);
}

/// Converge pods and deployment status to each deployment's desired scale
fn reconcile(state: &mut FakeState) {
    let auto_rollout = state.auto_rollout;
    for (name, deployment) in state.deployments.iter_mut() {
        let Some(spec) = deployment.spec.as_ref() else {
            continue;
        };
        let desired = spec.replicas.unwrap_or(1);
        let selector = selector_string(&spec.selector.match_labels.clone().unwrap_or_default());
        let running = state
            .pods
            .iter()
            .filter(|p| matches_selector(p, &selector))
            .count();

        if desired == 0 {
            state.pods.retain(|p| !matches_selector(p, &selector));
        } else if running == 0 {
            state.pods.push(Pod {
                metadata: ObjectMeta {
                    name: Some(format!("{}-0", name)),
                    namespace: Some(NAMESPACE.into()),
                    labels: spec.template.metadata.as_ref().and_then(|m| m.labels.clone()),
                    ..Default::default()
                },
                spec: spec.template.spec.clone(),
                status: Some(PodStatus::default()),
            });
        }

        if auto_rollout {
            deployment.status = Some(converged(desired));
        }
    }
}

fn apply_patch<T>(object: &T, patch: &Patch) -> Result<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(object)?;
    json_patch::patch(&mut value, patch)
        .map_err(|e| Error::Internal(format!("the server rejected our request: {}", e)))?;
    Ok(serde_json::from_value(value)?)
}

fn status_json(state: &FakeState) -> String {
    let up = state
        .ceph_osds
        .iter()
        .filter(|id| {
            let selector = format!("app=rook-ceph-osd,ceph-osd-id={}", id);
            state.pods.iter().any(|p| matches_selector(p, &selector))
        })
        .count();

    let mut status = state.base_status.clone();
    status["osdmap"]["osdmap"]["num_osds"] = state.ceph_osds.len().into();
    status["osdmap"]["osdmap"]["num_up_osds"] = up.into();
    status.to_string()
}

fn default_exec(state: &mut FakeState, command: &[String]) -> ExecOutput {
    let args: Vec<&str> = command.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["ceph", "status", ..] => ExecOutput::success(status_json(state)),
        ["ceph", "osd", "safe-to-destroy", osd] => ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: format!(
                "OSD(s) {} are safe to destroy without reducing data durability.",
                osd.trim_start_matches("osd.")
            ),
        },
        ["ceph", "osd", "reweight", osd, _] => ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: format!("reweighted {} to 0", osd),
        },
        ["ceph", "osd", "purge", id, "--yes-i-really-mean-it"] => {
            if let Ok(id) = id.parse::<u32>() {
                state.ceph_osds.remove(&id);
            }
            ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: format!("purged osd.{}", id),
            }
        }
        _ => ExecOutput {
            exit_code: 22,
            stdout: String::new(),
            stderr: format!("no valid command found for {:?}", command.join(" ")),
        },
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_deployment(&self, _namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.state.lock().deployments.get(name).cloned())
    }

    async fn create_deployment(&self, _namespace: &str, deployment: &Deployment) -> Result<()> {
        let mut state = self.state.lock();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        state.calls.push(format!("create_deployment {}", name));
        if state.deployments.contains_key(&name) {
            return Err(Error::Internal(format!("deployments \"{}\" already exists", name)));
        }
        state.deployments.insert(name, deployment.clone());
        reconcile(&mut state);
        Ok(())
    }

    async fn patch_deployment(&self, _namespace: &str, name: &str, patch: &Patch) -> Result<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("patch_deployment {} {}", name, serde_json::to_string(patch)?));
        let current = state
            .deployments
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Deployment".into(),
                name: name.into(),
            })?;
        let patched = apply_patch(&current, patch)?;
        state.deployments.insert(name.to_string(), patched);
        reconcile(&mut state);
        Ok(())
    }

    async fn delete_deployment(&self, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("delete_deployment {}", name));
        match state.deployments.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::ResourceNotFound {
                kind: "Deployment".into(),
                name: name.into(),
            }),
        }
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let mut state = self.state.lock();
        if state.pod_list_failures.pop_front() == Some(true) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| matches_selector(p, selector))
            .cloned()
            .collect())
    }

    async fn delete_pods(&self, _namespace: &str, selector: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("delete_pods {}", selector));
        state.pods.retain(|p| !matches_selector(p, selector));
        reconcile(&mut state);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state.lock().nodes.clone())
    }

    async fn patch_ceph_cluster(&self, _namespace: &str, _name: &str, patch: &Patch) -> Result<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("patch_ceph_cluster {}", serde_json::to_string(patch)?));
        let patched = apply_patch(&state.ceph_cluster, patch)?;
        state.ceph_cluster = patched;

        if state.ceph_cluster["spec"]["storage"]["useAllDevices"] == serde_json::json!(true) {
            let pending = std::mem::take(&mut state.block_osds_on_enable);
            for (id, host) in pending {
                add_osd(&mut state, id, &host, false);
            }
        }
        Ok(())
    }

    async fn exec(
        &self,
        _namespace: &str,
        pod: &str,
        _container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let pretty = command.join(" ");
        let hang = {
            let mut state = self.state.lock();
            state.calls.push(format!("exec {}", pretty));
            state.hang_exec
        };
        if hang {
            return futures::future::pending().await;
        }

        let mut state = self.state.lock();

        if !state
            .pods
            .iter()
            .any(|p| p.metadata.name.as_deref() == Some(pod))
        {
            return Err(Error::Exec {
                command: pretty,
                pod: pod.into(),
                reason: "pods not found".into(),
            });
        }

        if let Some(queue) = state.scripted_exec.get_mut(&pretty) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }

        Ok(default_exec(&mut state, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let pod = osd_pod(3, "10.0.0.1", false);
        assert!(matches_selector(&pod, "app=rook-ceph-osd"));
        assert!(matches_selector(&pod, "app=rook-ceph-osd,ceph-osd-id=3"));
        assert!(!matches_selector(&pod, "app=rook-ceph-osd,ceph-osd-id=4"));
        assert!(!matches_selector(&pod, "app=rook-ceph-tools"));
    }

    #[tokio::test]
    async fn test_scale_to_zero_marks_osd_down() {
        let fake = FakeCluster::new().with_toolbox().with_osd(0, "10.0.0.1", true);
        let patch: Patch = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/spec/replicas", "value": 0}
        ]))
        .unwrap();
        fake.patch_deployment(NAMESPACE, "rook-ceph-osd-0", &patch)
            .await
            .unwrap();

        let status = fake.with_state(|s| status_json(s));
        let status: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(status["osdmap"]["osdmap"]["num_osds"], 1);
        assert_eq!(status["osdmap"]["osdmap"]["num_up_osds"], 0);
    }
}
