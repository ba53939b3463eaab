use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{MetricsError, MetricsSource};
use crate::parsing::parse_sample_value;
use crate::types::SourceMetrics;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (serde_json::Value, String),
}

/// MetricsSource backed by the Prometheus HTTP query API.
pub struct PrometheusSource {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MetricsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn query(&self, promql: &str) -> Result<Vec<Sample>, MetricsError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let res = self
            .http
            .get(&url)
            .query(&[("query", promql)])
            .send()
            .await?;

        // Prometheus answers bad queries with 4xx and a JSON error body
        let http_status = res.status();
        let response: QueryResponse = match res.json().await {
            Ok(body) => body,
            Err(_) if !http_status.is_success() => {
                return Err(MetricsError::Query(format!("{}: HTTP {}", promql, http_status)));
            }
            Err(e) => return Err(e.into()),
        };

        if response.status != "success" {
            let reason = response.error.unwrap_or_else(|| response.status.clone());
            return Err(MetricsError::Query(format!("{}: {}", promql, reason)));
        }
        Ok(response.data.map(|d| d.result).unwrap_or_default())
    }

    /// First sample's value, 0 when the query matched nothing.
    async fn scalar(&self, promql: &str) -> Result<f64, MetricsError> {
        let samples = self.query(promql).await?;
        Ok(samples
            .first()
            .and_then(|s| parse_sample_value(&s.value.1))
            .unwrap_or(0.0))
    }

    pub async fn cpu_usage(&self, namespace: &str) -> Result<f64, MetricsError> {
        self.scalar(&format!(
            r#"sum(rate(container_cpu_usage_seconds_total{{namespace="{}"}}[5m])) * 100"#,
            namespace
        ))
        .await
    }

    pub async fn memory_usage(&self, namespace: &str) -> Result<f64, MetricsError> {
        self.scalar(&format!(
            r#"sum(container_memory_usage_bytes{{namespace="{ns}"}}) / sum(container_spec_memory_limit_bytes{{namespace="{ns}"}}) * 100"#,
            ns = namespace
        ))
        .await
    }

    pub async fn pod_count(&self, namespace: &str) -> Result<i64, MetricsError> {
        let v = self
            .scalar(&format!(r#"count(kube_pod_info{{namespace="{}"}})"#, namespace))
            .await?;
        Ok(v as i64)
    }

    pub async fn pod_status(&self, namespace: &str) -> Result<Vec<(String, i64)>, MetricsError> {
        let samples = self
            .query(&format!(
                r#"sum by (phase) (kube_pod_status_phase{{namespace="{}"}})"#,
                namespace
            ))
            .await?;
        Ok(samples
            .iter()
            .map(|s| {
                let phase = s
                    .metric
                    .get("phase")
                    .map(|p| p.to_ascii_lowercase())
                    .unwrap_or_else(|| "unknown".to_string());
                let count = parse_sample_value(&s.value.1).unwrap_or(0.0) as i64;
                (phase, count)
            })
            .collect())
    }

    pub async fn container_restarts(&self, namespace: &str) -> Result<i64, MetricsError> {
        let v = self
            .scalar(&format!(
                r#"sum(kube_pod_container_status_restarts_total{{namespace="{}"}})"#,
                namespace
            ))
            .await?;
        Ok(v as i64)
    }

    pub async fn node_cpu_usage(&self) -> Result<f64, MetricsError> {
        self.scalar(
            r#"sum(rate(node_cpu_seconds_total{mode!="idle"}[5m])) / sum(rate(node_cpu_seconds_total[5m])) * 100"#,
        )
        .await
    }

    pub async fn node_memory_usage(&self) -> Result<f64, MetricsError> {
        self.scalar("(1 - sum(node_memory_MemAvailable_bytes) / sum(node_memory_MemTotal_bytes)) * 100")
            .await
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn get_all(&self, namespace: &str) -> Result<SourceMetrics, MetricsError> {
        if !self.is_healthy().await {
            warn!(url = %self.base_url, "Prometheus unhealthy, reporting zeroed metrics");
            return Ok(SourceMetrics {
                healthy: false,
                timestamp: Some(Utc::now()),
                ..Default::default()
            });
        }

        let metrics = SourceMetrics {
            cpu_usage: self.cpu_usage(namespace).await?,
            memory_usage: self.memory_usage(namespace).await?,
            pod_count: self.pod_count(namespace).await?,
            pod_status: self.pod_status(namespace).await?,
            container_restarts: self.container_restarts(namespace).await?,
            node_cpu: self.node_cpu_usage().await?,
            node_memory: self.node_memory_usage().await?,
            healthy: true,
            timestamp: Some(Utc::now()),
        };
        debug!(
            cpu = metrics.cpu_usage,
            memory = metrics.memory_usage,
            restarts = metrics.container_restarts,
            "Queried Prometheus"
        );
        Ok(metrics)
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/-/healthy", self.base_url);
        match self.http.get(&url).send().await {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Prometheus health check failed");
                false
            }
        }
    }
}
