// Public modules
pub mod types;
pub mod config;
pub mod parsing;
pub mod kubernetes;
pub mod metrics;
pub mod collector;
pub mod analyzer;
pub mod decision;
pub mod scaler;
pub mod healer;
pub mod incidents;
pub mod runner;
pub mod report;
pub mod mock;

// Re-export commonly used items
pub use types::*;
pub use config::{load_config, load_config_with_env, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use parsing::{classify_pod, owning_deployment, parse_pod_phase, round2};
pub use kubernetes::{ControllerError, ControllerResult, KubeController, ResourceController, TimeoutController};
pub use metrics::{MetricsError, MetricsSource, PrometheusSource};
pub use collector::{analyze_pod_status, Monitor};
pub use analyzer::{Analyzer, Thresholds};
pub use decision::{CycleError, DecisionEngine};
pub use scaler::{GuardRejection, ScaleOutcome, Scaler};
pub use healer::{HealOutcome, Healer};
pub use incidents::{Incident, IncidentLedger, IncidentQuery, IncidentStats, LedgerError};
pub use runner::{ControlLoop, StopHandle};
pub use report::{CycleReport, EngineStatus, HealthStatus, HealthSummary};
