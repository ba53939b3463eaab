use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::*;

/// Overall grade of a namespace derived from its open issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn from_issues(issues: &[Issue]) -> Self {
        match issues.iter().map(|i| i.severity).max() {
            None => HealthStatus::Healthy,
            Some(Severity::High) => HealthStatus::Critical,
            Some(Severity::Medium) => HealthStatus::Degraded,
            Some(Severity::Low) => HealthStatus::Warning,
        }
    }
}

/// Point-in-time health summary of the managed namespace
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
    pub issues: Vec<Issue>,
    pub issue_count: usize,
}

impl HealthSummary {
    pub fn new(metrics: MetricsSnapshot, issues: Vec<Issue>) -> Self {
        Self {
            status: HealthStatus::from_issues(&issues),
            timestamp: Utc::now(),
            metrics,
            issue_count: issues.len(),
            issues,
        }
    }
}

/// What one control-loop cycle did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub issues: usize,
    pub actions_planned: usize,
    pub actions_executed: usize,
    pub actions_succeeded: usize,
    pub actions_skipped: usize,
    pub incidents_logged: usize,
    pub duration_ms: f64,
}

impl CycleReport {
    pub fn has_issues(&self) -> bool {
        self.issues > 0
    }

    pub fn actions_failed(&self) -> usize {
        self.actions_executed - self.actions_succeeded
    }
}

/// Snapshot of the loop driver's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub cycle_count: u64,
    pub interval_secs: u64,
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
}
