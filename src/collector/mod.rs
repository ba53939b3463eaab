use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::kubernetes::ResourceController;
use crate::metrics::{MetricsError, MetricsSource};
use crate::report::HealthSummary;
use crate::types::*;

/// Merges metrics and cluster listings into snapshots and classifies them.
pub struct Monitor {
    controller: Arc<dyn ResourceController>,
    source: Arc<dyn MetricsSource>,
    analyzer: Analyzer,
    namespace: String,
    call_timeout: Duration,
    last: Mutex<Option<MetricsSnapshot>>,
}

impl Monitor {
    pub fn new(
        controller: Arc<dyn ResourceController>,
        source: Arc<dyn MetricsSource>,
        analyzer: Analyzer,
        namespace: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            source,
            analyzer,
            namespace: namespace.into(),
            call_timeout,
            last: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Collect a fresh snapshot. Never fails: on any collection error the last
    /// good snapshot is returned, or an empty one if nothing was collected yet.
    pub async fn collect(&self) -> MetricsSnapshot {
        match self.try_collect().await {
            Ok(snapshot) => {
                debug!(
                    cpu = snapshot.cpu_usage,
                    memory = snapshot.memory_usage,
                    pods = snapshot.pod_count,
                    "Collected metrics"
                );
                *self.lock_last() = Some(snapshot.clone());
                snapshot
            }
            Err(e) => {
                warn!(error = %e, "Error collecting metrics, reusing last snapshot");
                self.last_snapshot().unwrap_or_else(|| MetricsSnapshot {
                    namespace: self.namespace.clone(),
                    ..Default::default()
                })
            }
        }
    }

    pub fn last_snapshot(&self) -> Option<MetricsSnapshot> {
        self.lock_last().clone()
    }

    pub fn analyze(&self, snapshot: &MetricsSnapshot) -> Vec<Issue> {
        self.analyzer.analyze(snapshot)
    }

    /// Collect, analyze and grade the namespace without acting on it.
    pub async fn health_summary(&self) -> HealthSummary {
        let metrics = self.collect().await;
        let issues = self.analyze(&metrics);
        HealthSummary::new(metrics, issues)
    }

    async fn try_collect(&self) -> Result<MetricsSnapshot> {
        let source = tokio::time::timeout(self.call_timeout, self.source.get_all(&self.namespace))
            .await
            .map_err(|_| MetricsError::Timeout(self.call_timeout))??;
        if !source.healthy {
            // zeroed sample from an unhealthy source would read as idle
            bail!("metrics source reported unhealthy");
        }
        let pods = self.controller.list_pods(&self.namespace).await?;
        let deployments = self.controller.list_deployments(&self.namespace).await?;

        let (pod_counts, problematic_pods) = analyze_pod_status(&pods);

        Ok(MetricsSnapshot {
            timestamp: Some(Utc::now()),
            namespace: self.namespace.clone(),
            cpu_usage: source.cpu_usage,
            memory_usage: source.memory_usage,
            pod_count: pods.len(),
            pod_counts,
            problematic_pods,
            deployments,
            container_restarts: source.container_restarts,
            node_cpu: source.node_cpu,
            node_memory: source.node_memory,
        })
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, Option<MetricsSnapshot>> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Count pods per phase and pick out the ones needing attention.
pub fn analyze_pod_status(pods: &[PodInfo]) -> (PodStatusCounts, Vec<ProblematicPod>) {
    let mut counts = PodStatusCounts::default();
    let mut problematic = Vec::new();

    for pod in pods {
        match pod.phase {
            PodPhase::Running => counts.running += 1,
            PodPhase::Pending => counts.pending += 1,
            PodPhase::Failed => counts.failed += 1,
            PodPhase::CrashLoopBackOff => counts.crashloopbackoff += 1,
            PodPhase::Succeeded | PodPhase::Unknown => counts.unknown += 1,
        }
        if matches!(pod.phase, PodPhase::Pending | PodPhase::Failed | PodPhase::CrashLoopBackOff) {
            problematic.push(ProblematicPod {
                name: pod.name.clone(),
                phase: pod.phase,
                restarts: pod.restarts,
            });
        }
    }

    (counts, problematic)
}
