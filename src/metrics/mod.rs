// Metrics sources
pub mod prometheus;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::SourceMetrics;

pub use prometheus::PrometheusSource;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics query failed: {0}")]
    Query(String),
    #[error("metrics source timed out after {0:?}")]
    Timeout(Duration),
}

/// Supplies utilization signals for a namespace.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_all(&self, namespace: &str) -> Result<SourceMetrics, MetricsError>;
    async fn is_healthy(&self) -> bool;
}
