use crate::types::PodPhase;

/// Classify a cluster status string (a pod phase or a container waiting reason).
pub fn parse_pod_phase(status: &str) -> PodPhase {
    let s = status.trim().to_ascii_lowercase();
    if s.contains("crash") || s.contains("backoff") {
        return PodPhase::CrashLoopBackOff;
    }
    match s.as_str() {
        "running" => PodPhase::Running,
        "pending" => PodPhase::Pending,
        "failed" => PodPhase::Failed,
        "succeeded" => PodPhase::Succeeded,
        _ => PodPhase::Unknown,
    }
}

/// Combine the pod phase with its containers' waiting reasons.
///
/// A crash-looping pod reports phase `Running` while its container waits with
/// reason `CrashLoopBackOff`, so any crash/back-off waiting reason wins.
pub fn classify_pod<'a, I>(phase: Option<&str>, waiting_reasons: I) -> PodPhase
where
    I: IntoIterator<Item = &'a str>,
{
    if waiting_reasons
        .into_iter()
        .any(|r| parse_pod_phase(r) == PodPhase::CrashLoopBackOff)
    {
        return PodPhase::CrashLoopBackOff;
    }
    phase.map(parse_pod_phase).unwrap_or(PodPhase::Unknown)
}

/// Owning deployment of a pod named `<deployment>-<replicaset-hash>-<pod-hash>`.
pub fn owning_deployment(pod_name: &str) -> &str {
    pod_name.rsplitn(3, '-').last().unwrap_or(pod_name)
}

/// Parse the string half of a Prometheus `[timestamp, "value"]` sample.
pub fn parse_sample_value(raw: &str) -> Option<f64> {
    let v = raw.trim().parse::<f64>().ok()?;
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
