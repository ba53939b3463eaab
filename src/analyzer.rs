use chrono::Utc;
use tracing::{info, warn};

use crate::types::{Config, Issue, IssueKind, MetricsSnapshot, PodPhase, Severity};

/// Deployments at or below this many replicas are never flagged as underutilized.
pub const UNDERUTILIZED_REPLICA_FLOOR: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub cpu_high: f64,
    pub cpu_low: f64,
    pub memory_high: f64,
    pub restart_alert_total: i64,
}

impl Thresholds {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cpu_high: cfg.cpu_high_threshold,
            cpu_low: cfg.cpu_low_threshold,
            memory_high: cfg.memory_high_threshold,
            restart_alert_total: cfg.restart_alert_total,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            cpu_low: 30.0,
            memory_high: 85.0,
            restart_alert_total: 10,
        }
    }
}

/// Classifies a snapshot into issues with fixed threshold rules.
#[derive(Debug, Clone)]
pub struct Analyzer {
    namespace: String,
    thresholds: Thresholds,
}

impl Analyzer {
    pub fn new(namespace: impl Into<String>, thresholds: Thresholds) -> Self {
        Self {
            namespace: namespace.into(),
            thresholds,
        }
    }

    /// Issues in rule order: CPU, memory, per-pod status, restart total.
    pub fn analyze(&self, snapshot: &MetricsSnapshot) -> Vec<Issue> {
        let t = &self.thresholds;
        let now = Utc::now();
        let mut issues = Vec::new();

        let cpu = snapshot.cpu_usage;
        if cpu > t.cpu_high {
            issues.push(Issue {
                kind: IssueKind::CpuOverload,
                severity: Severity::High,
                value: Some(cpu),
                threshold: Some(t.cpu_high),
                message: format!("CPU usage ({:.1}%) exceeds threshold ({}%)", cpu, t.cpu_high),
                resource: self.namespace.clone(),
                timestamp: now,
            });
        } else if cpu < t.cpu_low {
            for deployment in &snapshot.deployments {
                if deployment.replicas <= UNDERUTILIZED_REPLICA_FLOOR {
                    continue;
                }
                issues.push(Issue {
                    kind: IssueKind::CpuUnderutilized,
                    severity: Severity::Low,
                    value: Some(cpu),
                    threshold: Some(t.cpu_low),
                    message: format!(
                        "CPU usage ({:.1}%) below threshold ({}%), possible cost savings",
                        cpu, t.cpu_low
                    ),
                    resource: deployment.name.clone(),
                    timestamp: now,
                });
            }
        }

        let memory = snapshot.memory_usage;
        if memory > t.memory_high {
            issues.push(Issue {
                kind: IssueKind::MemoryPressure,
                severity: Severity::Medium,
                value: Some(memory),
                threshold: Some(t.memory_high),
                message: format!(
                    "Memory usage ({:.1}%) exceeds threshold ({}%)",
                    memory, t.memory_high
                ),
                resource: self.namespace.clone(),
                timestamp: now,
            });
        }

        for pod in &snapshot.problematic_pods {
            let (kind, severity, value, message) = match pod.phase {
                PodPhase::CrashLoopBackOff => (
                    IssueKind::PodCrashloop,
                    Severity::High,
                    Some(f64::from(pod.restarts)),
                    format!("Pod {} is in CrashLoopBackOff state", pod.name),
                ),
                PodPhase::Pending => (
                    IssueKind::PodPending,
                    Severity::Medium,
                    None,
                    format!("Pod {} stuck in Pending state", pod.name),
                ),
                PodPhase::Failed => (
                    IssueKind::PodFailed,
                    Severity::High,
                    None,
                    format!("Pod {} has failed", pod.name),
                ),
                _ => continue,
            };
            issues.push(Issue {
                kind,
                severity,
                value,
                threshold: None,
                message,
                resource: pod.name.clone(),
                timestamp: now,
            });
        }

        let restarts = snapshot.container_restarts;
        if restarts > t.restart_alert_total {
            issues.push(Issue {
                kind: IssueKind::HighRestartCount,
                severity: Severity::Medium,
                value: Some(restarts as f64),
                threshold: Some(t.restart_alert_total as f64),
                message: format!("Total container restarts ({}) is high", restarts),
                resource: self.namespace.clone(),
                timestamp: now,
            });
        }

        if issues.is_empty() {
            info!("No issues detected - system healthy");
        } else {
            let kinds: Vec<&str> = issues.iter().map(|i| i.kind.as_str()).collect();
            warn!(count = issues.len(), kinds = ?kinds, "Detected issues");
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploymentInfo, ProblematicPod};

    fn analyzer() -> Analyzer {
        Analyzer::new("demo", Thresholds::default())
    }

    fn deployment(name: &str, replicas: i32) -> DeploymentInfo {
        DeploymentInfo {
            name: name.to_string(),
            replicas,
            ready_replicas: replicas,
            available_replicas: replicas,
        }
    }

    fn snapshot(cpu: f64, memory: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            namespace: "demo".to_string(),
            cpu_usage: cpu,
            memory_usage: memory,
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_overload_single_issue() {
        let mut snap = snapshot(95.0, 40.0);
        snap.deployments = vec![deployment("web", 3), deployment("api", 4)];

        let issues = analyzer().analyze(&snap);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::CpuOverload);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].value, Some(95.0));
        assert_eq!(issues[0].threshold, Some(80.0));
        assert_eq!(issues[0].resource, "demo");
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(analyzer().analyze(&snapshot(80.0, 85.0)).is_empty());
    }

    #[test]
    fn test_underutilized_respects_replica_floor() {
        let mut snap = snapshot(10.0, 40.0);
        snap.deployments = vec![deployment("small", 2), deployment("big", 5), deployment("one", 1)];

        let issues = analyzer().analyze(&snap);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::CpuUnderutilized);
        assert_eq!(issues[0].severity, Severity::Low);
        assert_eq!(issues[0].resource, "big");
    }

    #[test]
    fn test_independent_triggers_in_rule_order() {
        let mut snap = snapshot(92.0, 90.0);
        snap.container_restarts = 14;
        snap.problematic_pods = vec![
            ProblematicPod { name: "web-1-a".to_string(), phase: PodPhase::CrashLoopBackOff, restarts: 7 },
            ProblematicPod { name: "web-1-b".to_string(), phase: PodPhase::Pending, restarts: 0 },
            ProblematicPod { name: "job-x-c".to_string(), phase: PodPhase::Failed, restarts: 1 },
        ];

        let kinds: Vec<IssueKind> = analyzer().analyze(&snap).iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::CpuOverload,
                IssueKind::MemoryPressure,
                IssueKind::PodCrashloop,
                IssueKind::PodPending,
                IssueKind::PodFailed,
                IssueKind::HighRestartCount,
            ]
        );
    }

    #[test]
    fn test_pod_issue_details() {
        let mut snap = snapshot(50.0, 50.0);
        snap.problematic_pods = vec![
            ProblematicPod { name: "web-7d9f-abcde".to_string(), phase: PodPhase::CrashLoopBackOff, restarts: 7 },
            ProblematicPod { name: "db-0".to_string(), phase: PodPhase::Pending, restarts: 0 },
        ];

        let issues = analyzer().analyze(&snap);
        assert_eq!(issues[0].resource, "web-7d9f-abcde");
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].value, Some(7.0));
        assert_eq!(issues[1].severity, Severity::Medium);
        assert_eq!(issues[1].value, None);
        assert!(issues[1].message.contains("Pending"));
    }

    #[test]
    fn test_restart_total_threshold() {
        let mut snap = snapshot(50.0, 50.0);
        snap.container_restarts = 10;
        assert!(analyzer().analyze(&snap).is_empty());

        snap.container_restarts = 11;
        let issues = analyzer().analyze(&snap);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::HighRestartCount);
        assert_eq!(issues[0].value, Some(11.0));
    }
}
