use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub prometheus_url: String,
    pub incidents_log: PathBuf,
    pub cpu_high_threshold: f64,
    pub cpu_low_threshold: f64,
    pub memory_high_threshold: f64,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub restart_threshold: i32,
    pub restart_alert_total: i64,
    pub loop_interval: Duration,
    pub default_deployment: String,
    pub call_timeout: Duration,
    pub cycle_deadline: Duration,
    pub incident_retention_hours: i64,
    pub compact_ledger_on_start: bool,
}

/// Pod status, classified once when the pod is read from the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Failed,
    Succeeded,
    CrashLoopBackOff,
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Running => "Running",
            PodPhase::Pending => "Pending",
            PodPhase::Failed => "Failed",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::CrashLoopBackOff => "CrashLoopBackOff",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: PodPhase,
    pub ready: Option<bool>,
    pub restarts: i32,
    pub created: Option<DateTime<Utc>>,
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub status: String,
    pub roles: Vec<String>,
    pub version: String,
}

/// What the metrics source reports for a namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub pod_count: i64,
    pub pod_status: Vec<(String, i64)>,
    pub container_restarts: i64,
    pub node_cpu: f64,
    pub node_memory: f64,
    pub healthy: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatusCounts {
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub crashloopbackoff: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblematicPod {
    pub name: String,
    pub phase: PodPhase,
    pub restarts: i32,
}

/// Merged view of the namespace at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub namespace: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub pod_count: usize,
    pub pod_counts: PodStatusCounts,
    pub problematic_pods: Vec<ProblematicPod>,
    pub deployments: Vec<DeploymentInfo>,
    pub container_restarts: i64,
    pub node_cpu: f64,
    pub node_memory: f64,
}

impl MetricsSnapshot {
    pub fn deployment(&self, name: &str) -> Option<&DeploymentInfo> {
        self.deployments.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    CpuOverload,
    CpuUnderutilized,
    MemoryPressure,
    PodCrashloop,
    PodPending,
    PodFailed,
    HighRestartCount,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::CpuOverload => "cpu_overload",
            IssueKind::CpuUnderutilized => "cpu_underutilized",
            IssueKind::MemoryPressure => "memory_pressure",
            IssueKind::PodCrashloop => "pod_crashloop",
            IssueKind::PodPending => "pod_pending",
            IssueKind::PodFailed => "pod_failed",
            IssueKind::HighRestartCount => "high_restart_count",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub resource: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScaleUp,
    ScaleDown,
    HealCrashloop,
    HealPending,
    HealFailed,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ScaleUp => "scale_up",
            ActionKind::ScaleDown => "scale_down",
            ActionKind::HealCrashloop => "heal_crashloop",
            ActionKind::HealPending => "heal_pending",
            ActionKind::HealFailed => "heal_failed",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned remediation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ScaleUp { deployment: String, delta: i32, reason: String },
    ScaleDown { deployment: String, delta: i32, reason: String },
    HealCrashloop { pod: String, restarts: i32, reason: String },
    HealPending { pod: String, reason: String },
    HealFailed { pod: String, reason: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ScaleUp { .. } => ActionKind::ScaleUp,
            Action::ScaleDown { .. } => ActionKind::ScaleDown,
            Action::HealCrashloop { .. } => ActionKind::HealCrashloop,
            Action::HealPending { .. } => ActionKind::HealPending,
            Action::HealFailed { .. } => ActionKind::HealFailed,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Action::ScaleUp { deployment, .. } | Action::ScaleDown { deployment, .. } => deployment,
            Action::HealCrashloop { pod, .. }
            | Action::HealPending { pod, .. }
            | Action::HealFailed { pod, .. } => pod,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Action::ScaleUp { reason, .. }
            | Action::ScaleDown { reason, .. }
            | Action::HealCrashloop { reason, .. }
            | Action::HealPending { reason, .. }
            | Action::HealFailed { reason, .. } => reason,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Action::ScaleUp { deployment, delta, .. } => {
                format!("Scale up {} by {} replica(s)", deployment, delta)
            }
            Action::ScaleDown { deployment, delta, .. } => {
                format!("Scale down {} by {} replica(s)", deployment, delta)
            }
            Action::HealCrashloop { pod, .. } => format!("Heal pod {} in CrashLoopBackOff", pod),
            Action::HealPending { pod, .. } => format!("Restart pending pod {}", pod),
            Action::HealFailed { pod, .. } => format!("Restart failed pod {}", pod),
        }
    }

    /// Parameters beyond kind and target, as stored in the ledger.
    pub fn details(&self) -> serde_json::Value {
        match self {
            Action::ScaleUp { delta, reason, .. } | Action::ScaleDown { delta, reason, .. } => {
                serde_json::json!({ "delta": delta, "reason": reason })
            }
            Action::HealCrashloop { restarts, reason, .. } => {
                serde_json::json!({ "restarts": restarts, "reason": reason })
            }
            Action::HealPending { reason, .. } | Action::HealFailed { reason, .. } => {
                serde_json::json!({ "reason": reason })
            }
        }
    }
}

/// Outcome of one executed action. `success == None` means pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: Option<bool>,
    pub message: String,
    pub duration_ms: Option<f64>,
    pub new_state: Option<serde_json::Value>,
}

impl ActionOutcome {
    pub fn pending() -> Self {
        Self {
            success: None,
            message: "pending".to_string(),
            duration_ms: None,
            new_state: None,
        }
    }

    pub fn succeeded(message: impl Into<String>, new_state: Option<serde_json::Value>) -> Self {
        Self {
            success: Some(true),
            message: message.into(),
            duration_ms: None,
            new_state,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            message: message.into(),
            duration_ms: None,
            new_state: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.success.is_none()
    }
}
