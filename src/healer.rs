use std::sync::Arc;

use tracing::{error, info, warn};

use crate::kubernetes::{ControllerResult, ResourceController};
use crate::parsing::owning_deployment;
use crate::types::{PodInfo, PodPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// The pod was deleted so its controller recreates it.
    PodDeleted { pod: String },
    /// The owning deployment was given a rolling restart.
    DeploymentRestarted { deployment: String, pod: String },
}

impl HealOutcome {
    pub fn target(&self) -> &str {
        match self {
            HealOutcome::PodDeleted { pod } => pod,
            HealOutcome::DeploymentRestarted { deployment, .. } => deployment,
        }
    }
}

/// Remediates crash-looping, pending and failed pods.
pub struct Healer {
    controller: Arc<dyn ResourceController>,
    namespace: String,
    restart_threshold: i32,
}

impl Healer {
    pub fn new(controller: Arc<dyn ResourceController>, namespace: impl Into<String>, restart_threshold: i32) -> Self {
        Self {
            controller,
            namespace: namespace.into(),
            restart_threshold,
        }
    }

    /// Escalates to a deployment restart once the pod has restarted more than the threshold.
    pub async fn heal_crashloop(&self, pod: &str, restarts: i32) -> ControllerResult<HealOutcome> {
        warn!(pod, restarts, "Healing CrashLoopBackOff pod");
        if restarts > self.restart_threshold {
            let deployment = owning_deployment(pod);
            info!(pod, deployment, restarts, "High restart count, restarting deployment");
            self.controller
                .restart_deployment(deployment, &self.namespace)
                .await?;
            return Ok(HealOutcome::DeploymentRestarted {
                deployment: deployment.to_string(),
                pod: pod.to_string(),
            });
        }
        self.delete_pod(pod, "CrashLoopBackOff detected").await
    }

    pub async fn heal_pending(&self, pod: &str) -> ControllerResult<HealOutcome> {
        warn!(pod, "Healing Pending pod");
        self.delete_pod(pod, "Pod stuck in Pending state").await
    }

    pub async fn heal_failed(&self, pod: &str) -> ControllerResult<HealOutcome> {
        warn!(pod, "Healing Failed pod");
        self.delete_pod(pod, "Pod in Failed state").await
    }

    /// Sweep every pod in the namespace and apply the matching remedy.
    ///
    /// Independent of the control loop. Only successful remedies are returned;
    /// failures are logged and the sweep moves on.
    pub async fn check_and_heal(&self) -> ControllerResult<Vec<HealOutcome>> {
        let pods = self.controller.list_pods(&self.namespace).await?;
        let mut healed = Vec::new();

        for pod in &pods {
            let result = match pod.phase {
                PodPhase::CrashLoopBackOff => self.heal_crashloop(&pod.name, pod.restarts).await,
                PodPhase::Pending => self.heal_pending(&pod.name).await,
                PodPhase::Failed => self.heal_failed(&pod.name).await,
                _ => {
                    if pod.restarts > self.restart_threshold {
                        warn!(pod = %pod.name, restarts = pod.restarts, "Pod has high restart count");
                    }
                    continue;
                }
            };
            match result {
                Ok(outcome) => healed.push(outcome),
                Err(e) => error!(pod = %pod.name, error = %e, "Healing failed"),
            }
        }

        if !healed.is_empty() {
            info!(count = healed.len(), "Healing sweep complete");
        }
        Ok(healed)
    }

    /// Pods that are not running or have restarted more than the threshold.
    pub async fn problematic_pods(&self) -> ControllerResult<Vec<PodInfo>> {
        let pods = self.controller.list_pods(&self.namespace).await?;
        Ok(pods
            .into_iter()
            .filter(|p| p.phase != PodPhase::Running || p.restarts > self.restart_threshold)
            .collect())
    }

    async fn delete_pod(&self, pod: &str, reason: &str) -> ControllerResult<HealOutcome> {
        self.controller.delete_pod(pod, &self.namespace).await?;
        info!(pod, reason, "Restarted pod");
        Ok(HealOutcome::PodDeleted { pod: pod.to_string() })
    }
}
