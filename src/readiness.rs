//! Live readiness checks against the orchestrator

use crate::identity::Identity;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use tracing::warn;

/// Derived backend state at query time.
///
/// Never stored: recomputed from orchestrator query results on every check,
/// so it cannot drift from the orchestrator's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// No workload instances exist for the identity
    Unknown,
    /// Instances exist but none is running and reachable yet
    Provisioning,
    /// At least one running, reachable instance exists
    Ready,
}

/// Determines whether an identity currently has a reachable backend
#[derive(Clone)]
pub struct ReadinessProbe {
    orchestrator: Arc<dyn Orchestrator>,
}

impl ReadinessProbe {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Check whether `identity` has a running, reachable backend.
    ///
    /// Never fails: any orchestrator query error is logged and treated as
    /// not-ready, so a flaky orchestrator degrades to the holding page
    /// rather than erroring requests.
    pub async fn is_ready(&self, identity: &Identity) -> bool {
        self.state(identity).await == BackendState::Ready
    }

    /// Derive the current backend state for `identity`
    pub async fn state(&self, identity: &Identity) -> BackendState {
        let instances = match self.orchestrator.list_instances(identity).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Readiness query failed, treating as not ready");
                return BackendState::Unknown;
            }
        };

        if instances.is_empty() {
            BackendState::Unknown
        } else if instances.iter().any(|i| i.is_serving()) {
            BackendState::Ready
        } else {
            BackendState::Provisioning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Ensured, InstanceStatus, OrchestratorError};
    use async_trait::async_trait;

    /// Probe-only fake: yields a fixed instance list or a fixed error
    struct FixedOrchestrator {
        instances: Result<Vec<InstanceStatus>, ()>,
    }

    #[async_trait]
    impl Orchestrator for FixedOrchestrator {
        async fn ensure_workload(
            &self,
            _identity: &Identity,
            _secret: &str,
        ) -> Result<Ensured, OrchestratorError> {
            unimplemented!("probe tests never create resources")
        }

        async fn ensure_endpoint(
            &self,
            _identity: &Identity,
        ) -> Result<Ensured, OrchestratorError> {
            unimplemented!("probe tests never create resources")
        }

        async fn list_instances(
            &self,
            _identity: &Identity,
        ) -> Result<Vec<InstanceStatus>, OrchestratorError> {
            match &self.instances {
                Ok(instances) => Ok(instances.clone()),
                Err(()) => Err(OrchestratorError::Api {
                    status: 500,
                    message: "boom".to_string(),
                }),
            }
        }
    }

    fn probe_with(instances: Result<Vec<InstanceStatus>, ()>) -> ReadinessProbe {
        ReadinessProbe::new(Arc::new(FixedOrchestrator { instances }))
    }

    fn alice() -> Identity {
        Identity::parse("alice").unwrap()
    }

    #[tokio::test]
    async fn test_no_instances_is_unknown_and_not_ready() {
        let probe = probe_with(Ok(vec![]));
        assert_eq!(probe.state(&alice()).await, BackendState::Unknown);
        assert!(!probe.is_ready(&alice()).await);
    }

    #[tokio::test]
    async fn test_pending_instances_are_provisioning() {
        let probe = probe_with(Ok(vec![InstanceStatus {
            running: false,
            reachable: false,
        }]));
        assert_eq!(probe.state(&alice()).await, BackendState::Provisioning);
        assert!(!probe.is_ready(&alice()).await);
    }

    #[tokio::test]
    async fn test_running_but_unreachable_is_not_ready() {
        let probe = probe_with(Ok(vec![InstanceStatus {
            running: true,
            reachable: false,
        }]));
        assert_eq!(probe.state(&alice()).await, BackendState::Provisioning);
        assert!(!probe.is_ready(&alice()).await);
    }

    #[tokio::test]
    async fn test_one_serving_instance_is_ready() {
        let probe = probe_with(Ok(vec![
            InstanceStatus {
                running: false,
                reachable: false,
            },
            InstanceStatus {
                running: true,
                reachable: true,
            },
        ]));
        assert_eq!(probe.state(&alice()).await, BackendState::Ready);
        assert!(probe.is_ready(&alice()).await);
    }

    #[tokio::test]
    async fn test_query_failure_is_fail_closed() {
        let probe = probe_with(Err(()));
        assert_eq!(probe.state(&alice()).await, BackendState::Unknown);
        assert!(!probe.is_ready(&alice()).await);
    }
}
