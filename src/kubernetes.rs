use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::{Api, Client};
use thiserror::Error;

use crate::parsing::classify_pod;
use crate::types::{DeploymentInfo, NodeInfo, PodInfo};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },
    #[error("{0}")]
    Rejected(String),
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

/// Primitive list/mutate operations against the cluster.
#[async_trait]
pub trait ResourceController: Send + Sync {
    async fn list_pods(&self, namespace: &str) -> ControllerResult<Vec<PodInfo>>;
    async fn list_deployments(&self, namespace: &str) -> ControllerResult<Vec<DeploymentInfo>>;
    async fn scale_deployment(&self, name: &str, replicas: i32, namespace: &str) -> ControllerResult<()>;
    async fn delete_pod(&self, name: &str, namespace: &str) -> ControllerResult<()>;
    async fn restart_deployment(&self, name: &str, namespace: &str) -> ControllerResult<()>;
    async fn pod_logs(&self, name: &str, namespace: &str, tail: i64) -> ControllerResult<String>;
    async fn list_nodes(&self) -> ControllerResult<Vec<NodeInfo>>;

    async fn deployment_replicas(&self, name: &str, namespace: &str) -> ControllerResult<i32> {
        self.list_deployments(namespace)
            .await?
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.replicas)
            .ok_or_else(|| ControllerError::NotFound {
                kind: "deployment",
                name: name.to_string(),
            })
    }
}

/// ResourceController backed by the Kubernetes API.
pub struct KubeController {
    client: Client,
}

impl KubeController {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceController for KubeController {
    async fn list_pods(&self, namespace: &str) -> ControllerResult<Vec<PodInfo>> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = pod_api.list(&ListParams::default()).await?;
        Ok(pods.items.iter().filter_map(pod_info).collect())
    }

    async fn list_deployments(&self, namespace: &str) -> ControllerResult<Vec<DeploymentInfo>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployments = api.list(&ListParams::default()).await?;
        Ok(deployments.items.iter().filter_map(deployment_info).collect())
    }

    async fn scale_deployment(&self, name: &str, replicas: i32, namespace: &str) -> ControllerResult<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> ControllerResult<()> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pod_api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn restart_deployment(&self, name: &str, namespace: &str) -> ControllerResult<()> {
        // Same mechanism as `kubectl rollout restart`
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": {
                "kubectl.kubernetes.io/restartedAt": Utc::now().to_rfc3339()
            }}}}
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn pod_logs(&self, name: &str, namespace: &str, tail: i64) -> ControllerResult<String> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail),
            ..Default::default()
        };
        Ok(pod_api.logs(name, &params).await?)
    }

    async fn list_nodes(&self) -> ControllerResult<Vec<NodeInfo>> {
        let node_api: Api<Node> = Api::all(self.client.clone());
        let nodes = node_api.list(&ListParams::default()).await?;
        Ok(nodes.items.iter().filter_map(node_info).collect())
    }
}

/// Wraps another controller so no single call can hang a cycle.
pub struct TimeoutController<C> {
    inner: C,
    timeout: Duration,
}

impl<C> TimeoutController<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> ControllerResult<T>
    where
        F: Future<Output = ControllerResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl<C: ResourceController> ResourceController for TimeoutController<C> {
    async fn list_pods(&self, namespace: &str) -> ControllerResult<Vec<PodInfo>> {
        self.bounded("list_pods", self.inner.list_pods(namespace)).await
    }

    async fn list_deployments(&self, namespace: &str) -> ControllerResult<Vec<DeploymentInfo>> {
        self.bounded("list_deployments", self.inner.list_deployments(namespace)).await
    }

    async fn scale_deployment(&self, name: &str, replicas: i32, namespace: &str) -> ControllerResult<()> {
        self.bounded("scale_deployment", self.inner.scale_deployment(name, replicas, namespace)).await
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> ControllerResult<()> {
        self.bounded("delete_pod", self.inner.delete_pod(name, namespace)).await
    }

    async fn restart_deployment(&self, name: &str, namespace: &str) -> ControllerResult<()> {
        self.bounded("restart_deployment", self.inner.restart_deployment(name, namespace)).await
    }

    async fn pod_logs(&self, name: &str, namespace: &str, tail: i64) -> ControllerResult<String> {
        self.bounded("pod_logs", self.inner.pod_logs(name, namespace, tail)).await
    }

    async fn list_nodes(&self) -> ControllerResult<Vec<NodeInfo>> {
        self.bounded("list_nodes", self.inner.list_nodes()).await
    }

    async fn deployment_replicas(&self, name: &str, namespace: &str) -> ControllerResult<i32> {
        self.bounded("deployment_replicas", self.inner.deployment_replicas(name, namespace)).await
    }
}

fn pod_info(pod: &Pod) -> Option<PodInfo> {
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref();
    let container_statuses = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let waiting_reasons = container_statuses
        .iter()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.as_deref());
    let phase = classify_pod(status.and_then(|s| s.phase.as_deref()), waiting_reasons);

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True");

    Some(PodInfo {
        name,
        phase,
        ready,
        restarts: container_statuses.iter().map(|cs| cs.restart_count).sum(),
        created: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
    })
}

fn deployment_info(deployment: &Deployment) -> Option<DeploymentInfo> {
    let name = deployment.metadata.name.clone()?;
    let status = deployment.status.as_ref();
    Some(DeploymentInfo {
        name,
        replicas: deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
    })
}

fn node_info(node: &Node) -> Option<NodeInfo> {
    let name = node.metadata.name.clone()?;

    let status = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| if c.status == "True" { "Ready" } else { "NotReady" })
        .unwrap_or("Unknown")
        .to_string();

    let mut roles: Vec<String> = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
                .filter(|role| !role.is_empty())
                .map(|role| role.to_string())
                .collect()
        })
        .unwrap_or_default();
    if roles.is_empty() {
        roles.push("<none>".to_string());
    }

    let version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.kubelet_version.clone())
        .unwrap_or_default();

    Some(NodeInfo { name, status, roles, version })
}
