//! In-memory collaborators for tests and dry runs.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::kubernetes::{ControllerError, ControllerResult, ResourceController};
use crate::metrics::{MetricsError, MetricsSource};
use crate::types::{DeploymentInfo, NodeInfo, PodInfo, PodPhase, SourceMetrics};

/// A mutation the controller was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Scale { deployment: String, replicas: i32 },
    DeletePod { pod: String },
    RestartDeployment { deployment: String },
}

#[derive(Debug, Default)]
struct ClusterState {
    pods: Vec<PodInfo>,
    deployments: Vec<DeploymentInfo>,
    nodes: Vec<NodeInfo>,
    calls: Vec<ControllerCall>,
    failing: HashSet<&'static str>,
    delay: Option<Duration>,
}

/// ResourceController over an in-memory cluster that records every mutation.
#[derive(Debug, Default)]
pub struct MockController {
    state: Mutex<ClusterState>,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployment(self, name: &str, replicas: i32) -> Self {
        self.lock().deployments.push(DeploymentInfo {
            name: name.to_string(),
            replicas,
            ready_replicas: replicas,
            available_replicas: replicas,
        });
        self
    }

    pub fn with_pod(self, name: &str, phase: PodPhase, restarts: i32) -> Self {
        self.lock().pods.push(PodInfo {
            name: name.to_string(),
            phase,
            ready: Some(phase == PodPhase::Running),
            restarts,
            created: None,
            node: Some("node-1".to_string()),
        });
        self
    }

    pub fn with_node(self, name: &str, status: &str) -> Self {
        self.lock().nodes.push(NodeInfo {
            name: name.to_string(),
            status: status.to_string(),
            roles: vec!["<none>".to_string()],
            version: "v1.26.0".to_string(),
        });
        self
    }

    /// Make the named operation (e.g. `"scale_deployment"`) fail.
    pub fn failing(self, operation: &'static str) -> Self {
        self.lock().failing.insert(operation);
        self
    }

    /// Delay every call, to exercise timeouts.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.lock().calls.clone()
    }

    pub fn replicas(&self, deployment: &str) -> Option<i32> {
        self.lock()
            .deployments
            .iter()
            .find(|d| d.name == deployment)
            .map(|d| d.replicas)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self, operation: &'static str) -> ControllerResult<()> {
        let (delay, failing) = {
            let state = self.lock();
            (state.delay, state.failing.contains(operation))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(ControllerError::Rejected(format!("{} failed", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceController for MockController {
    async fn list_pods(&self, _namespace: &str) -> ControllerResult<Vec<PodInfo>> {
        self.enter("list_pods").await?;
        Ok(self.lock().pods.clone())
    }

    async fn list_deployments(&self, _namespace: &str) -> ControllerResult<Vec<DeploymentInfo>> {
        self.enter("list_deployments").await?;
        Ok(self.lock().deployments.clone())
    }

    async fn scale_deployment(&self, name: &str, replicas: i32, _namespace: &str) -> ControllerResult<()> {
        self.enter("scale_deployment").await?;
        let mut state = self.lock();
        state.calls.push(ControllerCall::Scale {
            deployment: name.to_string(),
            replicas,
        });
        match state.deployments.iter_mut().find(|d| d.name == name) {
            Some(d) => {
                d.replicas = replicas;
                Ok(())
            }
            None => Err(ControllerError::NotFound {
                kind: "deployment",
                name: name.to_string(),
            }),
        }
    }

    async fn delete_pod(&self, name: &str, _namespace: &str) -> ControllerResult<()> {
        self.enter("delete_pod").await?;
        let mut state = self.lock();
        state.calls.push(ControllerCall::DeletePod { pod: name.to_string() });
        state.pods.retain(|p| p.name != name);
        Ok(())
    }

    async fn restart_deployment(&self, name: &str, _namespace: &str) -> ControllerResult<()> {
        self.enter("restart_deployment").await?;
        self.lock().calls.push(ControllerCall::RestartDeployment {
            deployment: name.to_string(),
        });
        Ok(())
    }

    async fn pod_logs(&self, name: &str, _namespace: &str, _tail: i64) -> ControllerResult<String> {
        self.enter("pod_logs").await?;
        Ok(format!("logs for {}", name))
    }

    async fn list_nodes(&self) -> ControllerResult<Vec<NodeInfo>> {
        self.enter("list_nodes").await?;
        Ok(self.lock().nodes.clone())
    }
}

/// MetricsSource returning a fixed sample, or failing on demand.
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    metrics: Mutex<Option<SourceMetrics>>,
    delay: Mutex<Option<Duration>>,
}

impl StaticMetricsSource {
    pub fn new(cpu_usage: f64, memory_usage: f64) -> Self {
        let source = Self::default();
        source.set(SourceMetrics {
            cpu_usage,
            memory_usage,
            healthy: true,
            ..Default::default()
        });
        source
    }

    pub fn set(&self, metrics: SourceMetrics) {
        *self.lock() = Some(metrics);
    }

    /// Subsequent `get_all` calls fail until `set` is called again.
    pub fn fail(&self) {
        *self.lock() = None;
    }

    /// Delay every `get_all`, to exercise timeouts.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delay);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SourceMetrics>> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn get_all(&self, _namespace: &str) -> Result<SourceMetrics, MetricsError> {
        let delay = *self.delay.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock()
            .clone()
            .ok_or_else(|| MetricsError::Query("metrics source unavailable".to_string()))
    }

    async fn is_healthy(&self) -> bool {
        self.lock().as_ref().map(|m| m.healthy).unwrap_or(false)
    }
}
