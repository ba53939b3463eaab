use std::sync::Arc;

use anyhow::{Context, Result};
use kube::Client;
use tracing::{info, warn};

use kube_remediator::{
    load_config, ControlLoop, DecisionEngine, IncidentLedger, KubeController, MetricsSource,
    PrometheusSource, ResourceController, TimeoutController,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config()?;
    info!(
        namespace = %cfg.namespace,
        interval_secs = cfg.loop_interval.as_secs(),
        replicas = ?(cfg.min_replicas, cfg.max_replicas),
        "Starting remediation controller"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let controller: Arc<dyn ResourceController> = Arc::new(TimeoutController::new(
        KubeController::new(client),
        cfg.call_timeout,
    ));

    let source = Arc::new(PrometheusSource::new(&cfg.prometheus_url, cfg.call_timeout)?);
    if !source.is_healthy().await {
        warn!(url = %cfg.prometheus_url, "Prometheus is not healthy, metrics will read as zero");
    }

    // Failing to open the ledger is the one fatal startup condition
    let ledger = IncidentLedger::open(&cfg.incidents_log, cfg.incident_retention_hours)
        .with_context(|| format!("Failed to open incident log {}", cfg.incidents_log.display()))?;
    if cfg.compact_ledger_on_start {
        if let Err(e) = ledger.compact() {
            warn!(error = %e, "Incident log compaction failed");
        }
    }

    let engine = Arc::new(DecisionEngine::from_config(&cfg, controller, source, Arc::new(ledger)));
    let (control, stop) = ControlLoop::new(engine.clone());
    let handle = tokio::spawn(control.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for the current cycle");
    stop.stop();
    let cycles = handle.await.context("Control loop task failed")?;

    let stats = engine.ledger().stats(cfg.incident_retention_hours);
    info!(
        cycles,
        incidents = stats.total_incidents,
        success_rate = stats.success_rate,
        "Remediation controller stopped"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
