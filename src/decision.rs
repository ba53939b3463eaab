use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::analyzer::{Analyzer, Thresholds};
use crate::collector::Monitor;
use crate::healer::{HealOutcome, Healer};
use crate::incidents::IncidentLedger;
use crate::kubernetes::ResourceController;
use crate::metrics::MetricsSource;
use crate::report::{CycleReport, EngineStatus};
use crate::scaler::{ScaleOutcome, Scaler};
use crate::types::*;

pub const OVERLOAD_SCALE_DELTA: i32 = 2;
pub const MEMORY_SCALE_DELTA: i32 = 1;
pub const UNDERUTILIZED_SCALE_DELTA: i32 = 1;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("cycle {cycle} exceeded its {deadline:?} deadline before acting")]
    DeadlineExceeded { cycle: u64, deadline: Duration },
}

/// Maps issues to actions, executes them, and records incidents.
pub struct DecisionEngine {
    monitor: Monitor,
    scaler: Scaler,
    healer: Healer,
    ledger: Arc<IncidentLedger>,
    default_deployment: String,
    interval: Duration,
    cycle_deadline: Duration,
    running: AtomicBool,
    cycle_count: AtomicU64,
}

impl DecisionEngine {
    pub fn new(monitor: Monitor, scaler: Scaler, healer: Healer, ledger: Arc<IncidentLedger>, config: &Config) -> Self {
        Self {
            monitor,
            scaler,
            healer,
            ledger,
            default_deployment: config.default_deployment.clone(),
            interval: config.loop_interval,
            cycle_deadline: config.cycle_deadline,
            running: AtomicBool::new(false),
            cycle_count: AtomicU64::new(0),
        }
    }

    /// Wire the monitor and both actuators onto one controller.
    pub fn from_config(
        config: &Config,
        controller: Arc<dyn ResourceController>,
        source: Arc<dyn MetricsSource>,
        ledger: Arc<IncidentLedger>,
    ) -> Self {
        let analyzer = Analyzer::new(&config.namespace, Thresholds::from_config(config));
        let monitor = Monitor::new(
            controller.clone(),
            source,
            analyzer,
            &config.namespace,
            config.call_timeout,
        );
        let scaler = Scaler::new(
            controller.clone(),
            &config.namespace,
            config.min_replicas,
            config.max_replicas,
        );
        let healer = Healer::new(controller, &config.namespace, config.restart_threshold);
        Self::new(monitor, scaler, healer, ledger, config)
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn healer(&self) -> &Healer {
        &self.healer
    }

    pub fn ledger(&self) -> &Arc<IncidentLedger> {
        &self.ledger
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Actions for `issues`, in issue order. Issues whose guard rejects them
    /// produce no action.
    pub async fn decide(&self, issues: &[Issue], snapshot: &MetricsSnapshot) -> Vec<Action> {
        self.plan(issues, snapshot).await.into_iter().flatten().collect()
    }

    /// Run each action in turn. A failing action yields a failed outcome and
    /// the rest still run.
    pub async fn execute(&self, actions: &[Action]) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            outcomes.push(self.execute_one(action).await);
        }
        outcomes
    }

    /// One pass of collect, analyze, decide, execute and log.
    ///
    /// Planning runs under the cycle deadline and a timeout aborts the cycle
    /// before anything is mutated. Once execution starts the deadline is only
    /// checked between actions; anything left is logged as pending.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.cycle_deadline;
        info!(cycle, namespace = self.monitor.namespace(), "Starting decision cycle");

        let planning = async {
            let snapshot = self.monitor.collect().await;
            let issues = self.monitor.analyze(&snapshot);
            let plan = self.plan(&issues, &snapshot).await;
            (snapshot, issues, plan)
        };
        let (snapshot, issues, plan) = tokio::time::timeout_at(deadline, planning)
            .await
            .map_err(|_| {
                warn!(cycle, deadline = ?self.cycle_deadline, "Cycle deadline passed while planning");
                CycleError::DeadlineExceeded {
                    cycle,
                    deadline: self.cycle_deadline,
                }
            })?;

        info!(
            cycle,
            cpu = snapshot.cpu_usage,
            memory = snapshot.memory_usage,
            pods = snapshot.pod_count,
            "Metrics collected"
        );
        if issues.is_empty() {
            info!(cycle, "No issues detected");
        }
        for issue in &issues {
            warn!(
                issue = %issue.kind,
                severity = %issue.severity,
                resource = %issue.resource,
                "{}",
                issue.message
            );
        }

        let mut report = CycleReport {
            cycle,
            issues: issues.len(),
            actions_planned: plan.iter().flatten().count(),
            ..Default::default()
        };

        for (issue, action) in issues.iter().zip(plan.iter()) {
            let outcome = match action {
                None => None,
                Some(action) if tokio::time::Instant::now() >= deadline => {
                    warn!(
                        cycle,
                        action = %action.describe(),
                        reason = action.reason(),
                        "Cycle deadline passed, action not dispatched"
                    );
                    report.actions_skipped += 1;
                    None
                }
                Some(action) => {
                    info!(
                        action = %action.kind(),
                        target = action.target(),
                        reason = action.reason(),
                        "{}",
                        action.describe()
                    );
                    let outcome = self.execute_one(action).await;
                    report.actions_executed += 1;
                    if outcome.success == Some(true) {
                        report.actions_succeeded += 1;
                    }
                    Some(outcome)
                }
            };
            self.ledger.log(issue, action.as_ref(), outcome.as_ref());
            report.incidents_logged += 1;
        }

        report.duration_ms = elapsed_ms(started);
        info!(
            cycle,
            issues = report.issues,
            executed = report.actions_executed,
            succeeded = report.actions_succeeded,
            skipped = report.actions_skipped,
            duration_ms = report.duration_ms,
            "Decision cycle complete"
        );
        Ok(report)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            cycle_count: self.cycle_count.load(Ordering::SeqCst),
            interval_secs: self.interval.as_secs(),
            namespace: self.monitor.namespace().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// One slot per issue so each incident pairs with its own action.
    ///
    /// Scale-ups and scale-downs update a projected replica count per
    /// deployment, so a second scale request in the same cycle is guarded
    /// against the first one's planned target rather than the stale read.
    async fn plan(&self, issues: &[Issue], snapshot: &MetricsSnapshot) -> Vec<Option<Action>> {
        let mut projected: HashMap<String, i32> = HashMap::new();
        let mut plan = Vec::with_capacity(issues.len());

        for issue in issues {
            let action = match issue.kind {
                IssueKind::CpuOverload => {
                    let deployment = self.scale_target(snapshot);
                    self.plan_scale_up(deployment, OVERLOAD_SCALE_DELTA, issue, snapshot, &mut projected)
                        .await
                }
                IssueKind::MemoryPressure => {
                    let deployment = self.scale_target(snapshot);
                    self.plan_scale_up(deployment, MEMORY_SCALE_DELTA, issue, snapshot, &mut projected)
                        .await
                }
                IssueKind::CpuUnderutilized => {
                    self.plan_scale_down(&issue.resource, UNDERUTILIZED_SCALE_DELTA, issue, snapshot, &mut projected)
                        .await
                }
                IssueKind::PodCrashloop => Some(Action::HealCrashloop {
                    pod: issue.resource.clone(),
                    restarts: issue.value.unwrap_or(0.0) as i32,
                    reason: issue.message.clone(),
                }),
                IssueKind::PodPending => Some(Action::HealPending {
                    pod: issue.resource.clone(),
                    reason: issue.message.clone(),
                }),
                IssueKind::PodFailed => Some(Action::HealFailed {
                    pod: issue.resource.clone(),
                    reason: issue.message.clone(),
                }),
                IssueKind::HighRestartCount => None,
            };
            plan.push(action);
        }
        plan
    }

    fn scale_target<'a>(&'a self, snapshot: &'a MetricsSnapshot) -> &'a str {
        snapshot
            .deployments
            .first()
            .map(|d| d.name.as_str())
            .unwrap_or(&self.default_deployment)
    }

    async fn plan_scale_up(
        &self,
        deployment: &str,
        delta: i32,
        issue: &Issue,
        snapshot: &MetricsSnapshot,
        projected: &mut HashMap<String, i32>,
    ) -> Option<Action> {
        let current = self.projected_replicas(deployment, snapshot, projected).await?;
        if !self.scaler.can_scale_up(current) {
            info!(deployment, current, issue = %issue.kind, "Scale up rejected: at maximum");
            return None;
        }
        projected.insert(deployment.to_string(), self.scaler.clamp(current.saturating_add(delta)));
        Some(Action::ScaleUp {
            deployment: deployment.to_string(),
            delta,
            reason: issue.message.clone(),
        })
    }

    async fn plan_scale_down(
        &self,
        deployment: &str,
        delta: i32,
        issue: &Issue,
        snapshot: &MetricsSnapshot,
        projected: &mut HashMap<String, i32>,
    ) -> Option<Action> {
        let current = self.projected_replicas(deployment, snapshot, projected).await?;
        if !self.scaler.can_scale_down(current) {
            info!(deployment, current, issue = %issue.kind, "Scale down rejected: at minimum");
            return None;
        }
        projected.insert(deployment.to_string(), self.scaler.clamp(current.saturating_sub(delta)));
        Some(Action::ScaleDown {
            deployment: deployment.to_string(),
            delta,
            reason: issue.message.clone(),
        })
    }

    /// Planned count if this cycle already touched the deployment, else the
    /// snapshot, else a live read. `None` when the count cannot be read.
    async fn projected_replicas(
        &self,
        deployment: &str,
        snapshot: &MetricsSnapshot,
        projected: &HashMap<String, i32>,
    ) -> Option<i32> {
        if let Some(&planned) = projected.get(deployment) {
            return Some(planned);
        }
        if let Some(d) = snapshot.deployment(deployment) {
            return Some(d.replicas);
        }
        match self.scaler.current_replicas(deployment).await {
            Ok(replicas) => Some(replicas),
            Err(e) => {
                warn!(deployment, error = %e, "Cannot read replicas, skipping scale action");
                None
            }
        }
    }

    async fn execute_one(&self, action: &Action) -> ActionOutcome {
        let started = Instant::now();
        let result = match action {
            Action::ScaleUp { deployment, delta, reason } => self
                .scaler
                .scale_up(deployment, *delta, reason)
                .await
                .map(scale_result),
            Action::ScaleDown { deployment, delta, reason } => self
                .scaler
                .scale_down(deployment, *delta, reason)
                .await
                .map(scale_result),
            Action::HealCrashloop { pod, restarts, .. } => {
                self.healer.heal_crashloop(pod, *restarts).await.map(heal_result)
            }
            Action::HealPending { pod, .. } => self.healer.heal_pending(pod).await.map(heal_result),
            Action::HealFailed { pod, .. } => self.healer.heal_failed(pod).await.map(heal_result),
        };

        let outcome = match result {
            Ok(outcome) => {
                if outcome.success == Some(true) {
                    info!(action = %action.kind(), target = action.target(), "{}", outcome.message);
                } else {
                    info!(action = %action.kind(), target = action.target(), reason = %outcome.message, "Action declined");
                }
                outcome
            }
            Err(e) => {
                error!(action = %action.kind(), target = action.target(), error = %e, "Action failed");
                ActionOutcome::failed(e.to_string())
            }
        };
        outcome.with_duration_ms(elapsed_ms(started))
    }
}

fn scale_result(outcome: ScaleOutcome) -> ActionOutcome {
    match outcome {
        ScaleOutcome::Scaled { deployment, from, to } => ActionOutcome::succeeded(
            format!("Scaled {} from {} to {} replicas", deployment, from, to),
            Some(json!({ "from": from, "to": to, "delta": to - from })),
        ),
        ScaleOutcome::Rejected { reason, current, .. } => ActionOutcome {
            new_state: Some(json!({ "current": current })),
            ..ActionOutcome::failed(reason.as_str())
        },
    }
}

fn heal_result(outcome: HealOutcome) -> ActionOutcome {
    match outcome {
        HealOutcome::PodDeleted { pod } => ActionOutcome::succeeded(
            format!("Deleted pod {}", pod),
            Some(json!({ "pod": pod })),
        ),
        HealOutcome::DeploymentRestarted { deployment, pod } => ActionOutcome::succeeded(
            format!("Restarted deployment {} for pod {}", deployment, pod),
            Some(json!({ "deployment": deployment, "pod": pod })),
        ),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config_with_env, MockEnvironment};
    use crate::mock::{ControllerCall, MockController, StaticMetricsSource};

    struct Harness {
        engine: DecisionEngine,
        controller: Arc<MockController>,
        source: Arc<StaticMetricsSource>,
        _dir: tempfile::TempDir,
    }

    fn harness(controller: MockController, cpu: f64, memory: f64, deadline_secs: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let env = MockEnvironment::new()
            .with_var("INCIDENTS_LOG", dir.path().join("incidents.log").to_string_lossy())
            .with_var("CYCLE_DEADLINE_SECS", deadline_secs)
            .with_var("CALL_TIMEOUT_SECS", "1");
        let config = load_config_with_env(&env).unwrap();

        let controller = Arc::new(controller);
        let source = Arc::new(StaticMetricsSource::new(cpu, memory));
        let ledger = Arc::new(IncidentLedger::open(&config.incidents_log, 24).unwrap());
        let engine = DecisionEngine::from_config(&config, controller.clone(), source.clone(), ledger);
        Harness {
            engine,
            controller,
            source,
            _dir: dir,
        }
    }

    fn snapshot_with(deployments: &[(&str, i32)]) -> MetricsSnapshot {
        MetricsSnapshot {
            namespace: "demo".to_string(),
            deployments: deployments
                .iter()
                .map(|(name, replicas)| DeploymentInfo {
                    name: name.to_string(),
                    replicas: *replicas,
                    ready_replicas: *replicas,
                    available_replicas: *replicas,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn issue(kind: IssueKind, resource: &str, value: Option<f64>) -> Issue {
        Issue {
            kind,
            severity: Severity::High,
            value,
            threshold: None,
            message: format!("{} on {}", kind, resource),
            resource: resource.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_decide_maps_each_issue_kind() {
        let h = harness(MockController::new(), 50.0, 50.0, "45");
        let snapshot = snapshot_with(&[("web", 3), ("api", 4)]);
        let issues = vec![
            issue(IssueKind::CpuOverload, "demo", Some(95.0)),
            issue(IssueKind::CpuUnderutilized, "api", Some(10.0)),
            issue(IssueKind::PodCrashloop, "web-1-a", Some(7.0)),
            issue(IssueKind::PodPending, "db-0", None),
            issue(IssueKind::PodFailed, "job-1-x", None),
            issue(IssueKind::HighRestartCount, "demo", Some(20.0)),
        ];

        let actions = h.engine.decide(&issues, &snapshot).await;
        let kinds: Vec<ActionKind> = actions.iter().map(Action::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::ScaleUp,
                ActionKind::ScaleDown,
                ActionKind::HealCrashloop,
                ActionKind::HealPending,
                ActionKind::HealFailed,
            ]
        );
        assert_eq!(actions[0].target(), "web");
        assert!(matches!(actions[0], Action::ScaleUp { delta: 2, .. }));
        assert_eq!(actions[1].target(), "api");
        assert!(matches!(actions[2], Action::HealCrashloop { restarts: 7, .. }));
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_decide_falls_back_to_default_deployment() {
        let h = harness(MockController::new().with_deployment("nginx-demo", 3), 50.0, 50.0, "45");
        let actions = h
            .engine
            .decide(&[issue(IssueKind::MemoryPressure, "demo", Some(90.0))], &snapshot_with(&[]))
            .await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target(), "nginx-demo");
        assert!(matches!(actions[0], Action::ScaleUp { delta: 1, .. }));
    }

    #[tokio::test]
    async fn test_guard_rejection_drops_action() {
        let h = harness(MockController::new(), 50.0, 50.0, "45");
        let at_max = snapshot_with(&[("web", 10)]);
        assert!(h
            .engine
            .decide(&[issue(IssueKind::CpuOverload, "demo", Some(95.0))], &at_max)
            .await
            .is_empty());

        let at_min = snapshot_with(&[("web", 2)]);
        assert!(h
            .engine
            .decide(&[issue(IssueKind::CpuUnderutilized, "web", Some(5.0))], &at_min)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_not_planned() {
        let h = harness(MockController::new(), 50.0, 50.0, "45");
        let actions = h
            .engine
            .decide(&[issue(IssueKind::CpuOverload, "demo", Some(95.0))], &snapshot_with(&[]))
            .await;
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn test_second_scale_up_sees_projected_replicas() {
        let h = harness(MockController::new(), 50.0, 50.0, "45");
        let issues = vec![
            issue(IssueKind::CpuOverload, "demo", Some(95.0)),
            issue(IssueKind::MemoryPressure, "demo", Some(90.0)),
        ];

        // 8 + 2 reaches the maximum, so memory pressure has no headroom left
        let actions = h.engine.decide(&issues, &snapshot_with(&[("web", 8)])).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind(), ActionKind::ScaleUp);

        let actions = h.engine.decide(&issues, &snapshot_with(&[("web", 5)])).await;
        assert_eq!(actions.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_isolates_failures() {
        let controller = MockController::new()
            .with_deployment("web", 3)
            .failing("delete_pod");
        let h = harness(controller, 50.0, 50.0, "45");
        let actions = vec![
            Action::HealPending {
                pod: "db-0".to_string(),
                reason: "pending".to_string(),
            },
            Action::ScaleUp {
                deployment: "web".to_string(),
                delta: 2,
                reason: "cpu".to_string(),
            },
        ];

        let outcomes = h.engine.execute(&actions).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].success, Some(false));
        assert!(outcomes[0].message.contains("delete_pod failed"));
        assert_eq!(outcomes[1].success, Some(true));
        assert_eq!(
            outcomes[1].new_state,
            Some(json!({ "from": 3, "to": 5, "delta": 2 }))
        );
        assert!(outcomes.iter().all(|o| o.duration_ms.is_some()));
    }

    #[tokio::test]
    async fn test_execute_reports_guard_reason() {
        let h = harness(MockController::new().with_deployment("web", 10), 50.0, 50.0, "45");
        let outcomes = h
            .engine
            .execute(&[Action::ScaleUp {
                deployment: "web".to_string(),
                delta: 1,
                reason: "cpu".to_string(),
            }])
            .await;
        assert_eq!(outcomes[0].success, Some(false));
        assert_eq!(outcomes[0].message, "at_maximum");
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_cycle_logs_every_issue() {
        let controller = MockController::new()
            .with_deployment("web", 3)
            .with_pod("web-1-a", PodPhase::Running, 0);
        let h = harness(controller, 95.0, 40.0, "45");
        h.source.set(SourceMetrics {
            cpu_usage: 95.0,
            memory_usage: 40.0,
            container_restarts: 12,
            healthy: true,
            ..Default::default()
        });

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.issues, 2);
        assert_eq!(report.actions_planned, 1);
        assert_eq!(report.actions_executed, 1);
        assert_eq!(report.actions_succeeded, 1);
        assert_eq!(report.incidents_logged, 2);
        assert_eq!(h.controller.replicas("web"), Some(5));

        let ledger = h.engine.ledger();
        let restarts = ledger.query(&crate::incidents::IncidentQuery {
            issue_type: Some(IssueKind::HighRestartCount),
            ..Default::default()
        });
        assert_eq!(restarts.len(), 1);
        assert!(restarts[0].action.is_none());
        assert!(restarts[0].result.is_none());
    }

    #[tokio::test]
    async fn test_run_cycle_without_issues() {
        let h = harness(MockController::new().with_deployment("web", 2), 50.0, 50.0, "45");
        let report = h.engine.run_cycle().await.unwrap();
        assert!(!report.has_issues());
        assert_eq!(report.incidents_logged, 0);
        assert!(h.engine.ledger().is_empty());
        assert_eq!(h.engine.status().cycle_count, 1);
    }

    #[tokio::test]
    async fn test_planning_past_deadline_aborts_before_mutation() {
        let controller = MockController::new()
            .with_deployment("web", 3)
            .with_delay(Duration::from_millis(700));
        let h = harness(controller, 95.0, 40.0, "1");

        let err = h.engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::DeadlineExceeded { cycle: 1, .. }));
        assert!(h.controller.calls().is_empty());
        assert!(h.engine.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_execution_past_deadline_logs_rest_as_pending() {
        // collect spends 1.6s of the 2s budget, the first heal ends past it
        let controller = MockController::new()
            .with_pod("db-0", PodPhase::Pending, 0)
            .with_pod("db-1", PodPhase::Pending, 0)
            .with_delay(Duration::from_millis(800));
        let h = harness(controller, 50.0, 50.0, "2");

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.issues, 2);
        assert_eq!(report.actions_planned, 2);
        assert_eq!(report.actions_executed, 1);
        assert_eq!(report.actions_succeeded, 1);
        assert_eq!(report.actions_skipped, 1);
        assert_eq!(report.incidents_logged, 2);
        assert_eq!(
            h.controller.calls(),
            vec![ControllerCall::DeletePod { pod: "db-0".to_string() }]
        );

        let timeline = h.engine.ledger().recent_timeline(10);
        let skipped = timeline.iter().find(|i| i.issue.resource == "db-1").unwrap();
        let result = skipped.result.as_ref().unwrap();
        assert!(result.is_pending());
        assert_eq!(result.message, "pending");
        assert_eq!(skipped.action.as_ref().unwrap().target, "db-1");

        let done = timeline.iter().find(|i| i.issue.resource == "db-0").unwrap();
        assert!(!done.result.as_ref().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_status_reflects_engine() {
        let h = harness(MockController::new(), 50.0, 50.0, "45");
        let status = h.engine.status();
        assert!(!status.running);
        assert_eq!(status.cycle_count, 0);
        assert_eq!(status.interval_secs, 60);
        assert_eq!(status.namespace, "demo");

        h.engine.set_running(true);
        assert!(h.engine.status().running);
    }
}
