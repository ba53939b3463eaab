use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::kubernetes::{ControllerResult, ResourceController};

/// Why a scale request was declined without touching the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardRejection {
    AtMaximum,
    AtMinimum,
    AlreadyAtTarget,
}

impl GuardRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardRejection::AtMaximum => "at_maximum",
            GuardRejection::AtMinimum => "at_minimum",
            GuardRejection::AlreadyAtTarget => "already_at_target",
        }
    }
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleOutcome {
    Scaled {
        deployment: String,
        from: i32,
        to: i32,
    },
    Rejected {
        deployment: String,
        reason: GuardRejection,
        current: i32,
    },
}

impl ScaleOutcome {
    pub fn is_scaled(&self) -> bool {
        matches!(self, ScaleOutcome::Scaled { .. })
    }

    /// Replicas actually added or removed; may be less than requested after clamping.
    pub fn applied_delta(&self) -> i32 {
        match self {
            ScaleOutcome::Scaled { from, to, .. } => (to - from).abs(),
            ScaleOutcome::Rejected { .. } => 0,
        }
    }
}

/// Applies replica changes within `[min_replicas, max_replicas]`.
pub struct Scaler {
    controller: Arc<dyn ResourceController>,
    namespace: String,
    min_replicas: i32,
    max_replicas: i32,
}

impl Scaler {
    pub fn new(
        controller: Arc<dyn ResourceController>,
        namespace: impl Into<String>,
        min_replicas: i32,
        max_replicas: i32,
    ) -> Self {
        Self {
            controller,
            namespace: namespace.into(),
            min_replicas,
            max_replicas,
        }
    }

    pub async fn current_replicas(&self, deployment: &str) -> ControllerResult<i32> {
        self.controller.deployment_replicas(deployment, &self.namespace).await
    }

    pub fn can_scale_up(&self, current: i32) -> bool {
        current < self.max_replicas
    }

    pub fn can_scale_down(&self, current: i32) -> bool {
        current > self.min_replicas
    }

    pub fn clamp(&self, replicas: i32) -> i32 {
        replicas.clamp(self.min_replicas, self.max_replicas)
    }

    pub async fn scale_up(&self, deployment: &str, delta: i32, reason: &str) -> ControllerResult<ScaleOutcome> {
        let current = self.current_replicas(deployment).await?;
        let target = self.clamp(current.saturating_add(delta));
        if target <= current {
            info!(deployment, max = self.max_replicas, "Cannot scale up: already at maximum");
            return Ok(ScaleOutcome::Rejected {
                deployment: deployment.to_string(),
                reason: GuardRejection::AtMaximum,
                current,
            });
        }
        self.apply(deployment, current, target, reason).await
    }

    pub async fn scale_down(&self, deployment: &str, delta: i32, reason: &str) -> ControllerResult<ScaleOutcome> {
        let current = self.current_replicas(deployment).await?;
        let target = self.clamp(current.saturating_sub(delta));
        if target >= current {
            info!(deployment, min = self.min_replicas, "Cannot scale down: already at minimum");
            return Ok(ScaleOutcome::Rejected {
                deployment: deployment.to_string(),
                reason: GuardRejection::AtMinimum,
                current,
            });
        }
        self.apply(deployment, current, target, reason).await
    }

    /// Scale to an explicit count, clamped into the replica bounds first.
    pub async fn scale_to(&self, deployment: &str, target: i32, reason: &str) -> ControllerResult<ScaleOutcome> {
        let current = self.current_replicas(deployment).await?;
        let target = self.clamp(target);
        if target == current {
            info!(deployment, target, "Deployment already at target");
            return Ok(ScaleOutcome::Rejected {
                deployment: deployment.to_string(),
                reason: GuardRejection::AlreadyAtTarget,
                current,
            });
        }
        self.apply(deployment, current, target, reason).await
    }

    async fn apply(&self, deployment: &str, from: i32, to: i32, reason: &str) -> ControllerResult<ScaleOutcome> {
        self.controller
            .scale_deployment(deployment, to, &self.namespace)
            .await?;
        info!(deployment, from, to, reason, "Scaled deployment");
        Ok(ScaleOutcome::Scaled {
            deployment: deployment.to_string(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ControllerCall, MockController};

    fn scaler(controller: &Arc<MockController>) -> Scaler {
        Scaler::new(controller.clone(), "demo", 2, 10)
    }

    #[tokio::test]
    async fn test_scale_up_within_bounds() {
        let controller = Arc::new(MockController::new().with_deployment("web", 3));
        let outcome = scaler(&controller).scale_up("web", 2, "cpu").await.unwrap();

        assert_eq!(
            outcome,
            ScaleOutcome::Scaled { deployment: "web".to_string(), from: 3, to: 5 }
        );
        assert_eq!(outcome.applied_delta(), 2);
        assert_eq!(controller.replicas("web"), Some(5));
    }

    #[tokio::test]
    async fn test_scale_up_clamps_to_maximum() {
        let controller = Arc::new(MockController::new().with_deployment("web", 9));
        let outcome = scaler(&controller).scale_up("web", 2, "cpu").await.unwrap();

        assert_eq!(outcome.applied_delta(), 1);
        assert_eq!(controller.replicas("web"), Some(10));
    }

    #[tokio::test]
    async fn test_scale_up_at_maximum_is_a_no_op() {
        let controller = Arc::new(MockController::new().with_deployment("web", 10));
        let outcome = scaler(&controller).scale_up("web", 2, "cpu").await.unwrap();

        assert_eq!(
            outcome,
            ScaleOutcome::Rejected {
                deployment: "web".to_string(),
                reason: GuardRejection::AtMaximum,
                current: 10,
            }
        );
        assert!(controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scale_down_symmetric_at_minimum() {
        let controller = Arc::new(MockController::new().with_deployment("web", 3));
        let s = scaler(&controller);

        let outcome = s.scale_down("web", 5, "idle").await.unwrap();
        assert_eq!(
            outcome,
            ScaleOutcome::Scaled { deployment: "web".to_string(), from: 3, to: 2 }
        );

        let outcome = s.scale_down("web", 1, "idle").await.unwrap();
        assert!(matches!(
            outcome,
            ScaleOutcome::Rejected { reason: GuardRejection::AtMinimum, current: 2, .. }
        ));
        assert_eq!(controller.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scale_to_clamps_then_checks_target() {
        let controller = Arc::new(MockController::new().with_deployment("web", 10));
        let s = scaler(&controller);

        let outcome = s.scale_to("web", 50, "manual").await.unwrap();
        assert!(matches!(
            outcome,
            ScaleOutcome::Rejected { reason: GuardRejection::AlreadyAtTarget, .. }
        ));

        let outcome = s.scale_to("web", 0, "manual").await.unwrap();
        assert_eq!(
            outcome,
            ScaleOutcome::Scaled { deployment: "web".to_string(), from: 10, to: 2 }
        );
        assert_eq!(
            controller.calls(),
            vec![ControllerCall::Scale { deployment: "web".to_string(), replicas: 2 }]
        );
    }

    #[tokio::test]
    async fn test_scale_up_below_minimum_lands_on_minimum() {
        let controller = Arc::new(MockController::new().with_deployment("web", 0));
        let outcome = scaler(&controller).scale_up("web", 1, "cpu").await.unwrap();

        assert_eq!(
            outcome,
            ScaleOutcome::Scaled { deployment: "web".to_string(), from: 0, to: 2 }
        );
        assert!(outcome.is_scaled());
        assert_eq!(
            controller.calls(),
            vec![ControllerCall::Scale { deployment: "web".to_string(), replicas: 2 }]
        );
    }

    #[tokio::test]
    async fn test_scale_down_above_maximum_lands_on_maximum() {
        let controller = Arc::new(MockController::new().with_deployment("web", 15));
        let outcome = scaler(&controller).scale_down("web", 1, "idle").await.unwrap();

        assert_eq!(
            outcome,
            ScaleOutcome::Scaled { deployment: "web".to_string(), from: 15, to: 10 }
        );
        assert_eq!(controller.replicas("web"), Some(10));
    }

    #[tokio::test]
    async fn test_out_of_bounds_never_moves_the_wrong_way() {
        let controller = Arc::new(
            MockController::new()
                .with_deployment("big", 15)
                .with_deployment("small", 0),
        );
        let s = scaler(&controller);

        let up = s.scale_up("big", 1, "cpu").await.unwrap();
        assert!(!up.is_scaled());
        assert!(matches!(up, ScaleOutcome::Rejected { reason: GuardRejection::AtMaximum, current: 15, .. }));

        let down = s.scale_down("small", 1, "idle").await.unwrap();
        assert!(matches!(down, ScaleOutcome::Rejected { reason: GuardRejection::AtMinimum, current: 0, .. }));
        assert!(controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_an_error() {
        let controller = Arc::new(MockController::new());
        assert!(scaler(&controller).scale_up("ghost", 1, "cpu").await.is_err());
    }

    #[test]
    fn test_guard_predicates() {
        let controller = Arc::new(MockController::new());
        let s = scaler(&controller);
        assert!(s.can_scale_up(9));
        assert!(!s.can_scale_up(10));
        assert!(s.can_scale_down(3));
        assert!(!s.can_scale_down(2));
        assert_eq!(s.clamp(42), 10);
        assert_eq!(s.clamp(-1), 2);
        assert_eq!(GuardRejection::AtMaximum.to_string(), "at_maximum");
    }
}
