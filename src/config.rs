use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use crate::types::Config;

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Result<Config> {
    load_config_with_env(&SystemEnvironment)
}

pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<Config> {
    let namespace = env.get_var("K8S_NAMESPACE")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "demo".to_string());

    let prometheus_url = env.get_var("PROMETHEUS_URL")
        .unwrap_or_else(|| "http://localhost:9090".to_string())
        .trim_end_matches('/')
        .to_string();

    let log_dir = env.get_var("LOG_DIR").unwrap_or_else(|| "logs".to_string());
    let incidents_log = env.get_var("INCIDENTS_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(log_dir).join("incidents.log"));

    let cpu_high_threshold: f64 = parse_required(env, "CPU_HIGH_THRESHOLD", "80.0")?;
    let cpu_low_threshold: f64 = parse_required(env, "CPU_LOW_THRESHOLD", "30.0")?;
    let memory_high_threshold: f64 = parse_required(env, "MEMORY_HIGH_THRESHOLD", "85.0")?;
    if cpu_low_threshold >= cpu_high_threshold {
        return Err(anyhow!(
            "CPU_LOW_THRESHOLD ({}) must be below CPU_HIGH_THRESHOLD ({})",
            cpu_low_threshold,
            cpu_high_threshold
        ));
    }

    let min_replicas: i32 = parse_required(env, "MIN_REPLICAS", "2")?;
    let max_replicas: i32 = parse_required(env, "MAX_REPLICAS", "10")?;
    if min_replicas < 0 || min_replicas > max_replicas {
        return Err(anyhow!(
            "MIN_REPLICAS ({}) must be between 0 and MAX_REPLICAS ({})",
            min_replicas,
            max_replicas
        ));
    }

    let restart_threshold: i32 = parse_required(env, "RESTART_THRESHOLD", "5")?;
    let restart_alert_total: i64 = parse_required(env, "RESTART_ALERT_TOTAL", "10")?;

    let loop_interval_secs: u64 = parse_required(env, "DECISION_LOOP_INTERVAL", "60")?;
    if loop_interval_secs == 0 {
        return Err(anyhow!("DECISION_LOOP_INTERVAL must be at least 1 second"));
    }

    let default_deployment = env.get_var("DEFAULT_DEPLOYMENT")
        .unwrap_or_else(|| "nginx-demo".to_string());

    let call_timeout_secs: u64 = env.get_var("CALL_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(5);

    let cycle_deadline_secs: u64 = env.get_var("CYCLE_DEADLINE_SECS")
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(45);

    let incident_retention_hours: i64 = env.get_var("INCIDENT_RETENTION_HOURS")
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(24);

    let compact_ledger_on_start = env.get_var("COMPACT_LEDGER_ON_START")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);

    Ok(Config {
        namespace,
        prometheus_url,
        incidents_log,
        cpu_high_threshold,
        cpu_low_threshold,
        memory_high_threshold,
        min_replicas,
        max_replicas,
        restart_threshold,
        restart_alert_total,
        loop_interval: Duration::from_secs(loop_interval_secs),
        default_deployment,
        call_timeout: Duration::from_secs(call_timeout_secs),
        cycle_deadline: Duration::from_secs(cycle_deadline_secs),
        incident_retention_hours,
        compact_ledger_on_start,
    })
}

fn parse_required<E, T>(env: &E, key: &str, default: &str) -> Result<T>
where
    E: EnvironmentProvider,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env.get_var(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_loading_with_env() {
        let env = MockEnvironment::new()
            .with_var("K8S_NAMESPACE", "prod")
            .with_var("PROMETHEUS_URL", "http://prometheus:9090/")
            .with_var("INCIDENTS_LOG", "/var/log/remediator/incidents.log")
            .with_var("CPU_HIGH_THRESHOLD", "90")
            .with_var("CPU_LOW_THRESHOLD", "20")
            .with_var("MEMORY_HIGH_THRESHOLD", "75.5")
            .with_var("MIN_REPLICAS", "1")
            .with_var("MAX_REPLICAS", "20")
            .with_var("RESTART_THRESHOLD", "3")
            .with_var("DECISION_LOOP_INTERVAL", "15")
            .with_var("DEFAULT_DEPLOYMENT", "api")
            .with_var("CALL_TIMEOUT_SECS", "2")
            .with_var("CYCLE_DEADLINE_SECS", "10")
            .with_var("COMPACT_LEDGER_ON_START", "true");

        let config = load_config_with_env(&env).unwrap();

        assert_eq!(config.namespace, "prod");
        assert_eq!(config.prometheus_url, "http://prometheus:9090");
        assert_eq!(config.incidents_log, PathBuf::from("/var/log/remediator/incidents.log"));
        assert_eq!(config.cpu_high_threshold, 90.0);
        assert_eq!(config.cpu_low_threshold, 20.0);
        assert_eq!(config.memory_high_threshold, 75.5);
        assert_eq!(config.min_replicas, 1);
        assert_eq!(config.max_replicas, 20);
        assert_eq!(config.restart_threshold, 3);
        assert_eq!(config.loop_interval, Duration::from_secs(15));
        assert_eq!(config.default_deployment, "api");
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(config.cycle_deadline, Duration::from_secs(10));
        assert!(config.compact_ledger_on_start);
    }

    #[test]
    fn test_config_loading_defaults() {
        let config = load_config_with_env(&MockEnvironment::new()).unwrap();

        assert_eq!(config.namespace, "demo");
        assert_eq!(config.prometheus_url, "http://localhost:9090");
        assert_eq!(config.incidents_log, PathBuf::from("logs").join("incidents.log"));
        assert_eq!(config.cpu_high_threshold, 80.0);
        assert_eq!(config.cpu_low_threshold, 30.0);
        assert_eq!(config.memory_high_threshold, 85.0);
        assert_eq!(config.min_replicas, 2);
        assert_eq!(config.max_replicas, 10);
        assert_eq!(config.restart_threshold, 5);
        assert_eq!(config.restart_alert_total, 10);
        assert_eq!(config.loop_interval, Duration::from_secs(60));
        assert_eq!(config.default_deployment, "nginx-demo");
        assert_eq!(config.incident_retention_hours, 24);
        assert!(!config.compact_ledger_on_start);
    }

    #[test]
    fn test_log_dir_drives_incidents_path() {
        let env = MockEnvironment::new().with_var("LOG_DIR", "/tmp/remediator");
        let config = load_config_with_env(&env).unwrap();
        assert_eq!(config.incidents_log, PathBuf::from("/tmp/remediator/incidents.log"));
    }

    #[test]
    fn test_config_loading_invalid_threshold() {
        let env = MockEnvironment::new().with_var("CPU_HIGH_THRESHOLD", "invalid");

        let result = load_config_with_env(&env);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("CPU_HIGH_THRESHOLD"));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let env = MockEnvironment::new()
            .with_var("MIN_REPLICAS", "8")
            .with_var("MAX_REPLICAS", "4");
        let err = load_config_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("MIN_REPLICAS"));

        let env = MockEnvironment::new()
            .with_var("CPU_LOW_THRESHOLD", "85")
            .with_var("CPU_HIGH_THRESHOLD", "80");
        let err = load_config_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("CPU_LOW_THRESHOLD"));
    }

    #[test]
    fn test_invalid_timeouts_fall_back() {
        let env = MockEnvironment::new()
            .with_var("CALL_TIMEOUT_SECS", "soon")
            .with_var("CYCLE_DEADLINE_SECS", "0")
            .with_var("INCIDENT_RETENTION_HOURS", "-3");

        let config = load_config_with_env(&env).unwrap();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.cycle_deadline, Duration::from_secs(45));
        assert_eq!(config.incident_retention_hours, 24);
    }

    #[test]
    fn test_boolean_parsing() {
        for val in ["1", "true", "TRUE", "True"] {
            let env = MockEnvironment::new().with_var("COMPACT_LEDGER_ON_START", val);
            let config = load_config_with_env(&env).unwrap();
            assert!(config.compact_ledger_on_start, "Failed for value: {}", val);
        }

        for val in ["0", "false", "FALSE", "no", "off", ""] {
            let env = MockEnvironment::new().with_var("COMPACT_LEDGER_ON_START", val);
            let config = load_config_with_env(&env).unwrap();
            assert!(!config.compact_ledger_on_start, "Failed for value: {}", val);
        }
    }
}
