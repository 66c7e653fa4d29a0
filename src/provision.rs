//! On-demand backend provisioning jobs
//!
//! A provisioning job idempotently creates the workload and endpoint
//! records for an identity, then polls readiness with bounded attempts and
//! reports exactly one terminal event (`ready` or `failed`) to the
//! triggering session's notification sink. Jobs are detached tasks: they
//! outlive the request that spawned them and never report back to it.

use crate::config::{ProvisionerConfig, UpstreamConfig};
use crate::identity::Identity;
use crate::notify::{NotificationChannel, ProvisionEvent};
use crate::orchestrator::{Ensured, Orchestrator, OrchestratorError};
use crate::readiness::ReadinessProbe;
use crate::routing::RoutingTarget;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Terminal state of a provisioning job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The backend became reachable within the poll bound
    Ready,
    /// Resource creation failed or the poll bound was exhausted
    Failed,
}

/// Bounded linear readiness polling.
///
/// Cold-start time for this workload class is roughly bounded and
/// predictable, so the backoff is linear rather than exponential.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Number of readiness checks before giving up
    pub attempts: u32,
    /// Fixed delay between checks
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

impl From<&ProvisionerConfig> for PollPolicy {
    fn from(config: &ProvisionerConfig) -> Self {
        Self {
            attempts: config.poll_attempts,
            interval: config.poll_interval(),
        }
    }
}

/// Creates backend resources for an identity and polls until reachable
pub struct BackendProvisioner {
    orchestrator: Arc<dyn Orchestrator>,
    probe: ReadinessProbe,
    notifier: Arc<dyn NotificationChannel>,
    policy: PollPolicy,
    upstream: UpstreamConfig,
}

impl BackendProvisioner {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        notifier: Arc<dyn NotificationChannel>,
        policy: PollPolicy,
        upstream: UpstreamConfig,
    ) -> Arc<Self> {
        let probe = ReadinessProbe::new(Arc::clone(&orchestrator));
        Arc::new(Self {
            orchestrator,
            probe,
            notifier,
            policy,
            upstream,
        })
    }

    /// Launch a provisioning job for `identity` as a detached task.
    ///
    /// Returns immediately; the job reports progress through the
    /// notification sink addressed by `session` (no session, no
    /// notifications — the resources are still created). The returned
    /// handle lets tests await the terminal outcome; callers on the
    /// request path drop it.
    pub fn start(
        self: &Arc<Self>,
        identity: Identity,
        session: Option<String>,
    ) -> JoinHandle<JobOutcome> {
        let provisioner = Arc::clone(self);
        tokio::spawn(async move { provisioner.run_job(identity, session).await })
    }

    async fn run_job(&self, identity: Identity, session: Option<String>) -> JobOutcome {
        info!(identity = %identity, "Provisioning job started");
        self.notify(&session, ProvisionEvent::Starting, "Starting backend...")
            .await;

        let secret = new_access_secret();

        match self.orchestrator.ensure_workload(&identity, &secret).await {
            Ok(Ensured::Created) => {}
            Ok(Ensured::AlreadyExists) | Err(OrchestratorError::AlreadyExists) => {
                debug!(identity = %identity, "Workload record present from an earlier trigger");
            }
            Err(e) => {
                error!(identity = %identity, resource = "workload", error = %e, "Resource creation failed");
                self.notify(&session, ProvisionEvent::Failed, "Backend creation failed")
                    .await;
                return JobOutcome::Failed;
            }
        }

        match self.orchestrator.ensure_endpoint(&identity).await {
            Ok(_) | Err(OrchestratorError::AlreadyExists) => {}
            Err(e) => {
                error!(identity = %identity, resource = "endpoint", error = %e, "Resource creation failed");
                self.notify(&session, ProvisionEvent::Failed, "Backend creation failed")
                    .await;
                return JobOutcome::Failed;
            }
        }

        for attempt in 1..=self.policy.attempts {
            if self.probe.is_ready(&identity).await {
                let target = RoutingTarget::derive(&identity, &self.upstream);
                info!(identity = %identity, attempt, target = %target, "Backend is ready");
                let payload = ready_payload(&target, &secret);
                self.notify(&session, ProvisionEvent::Ready, &payload).await;
                return JobOutcome::Ready;
            }

            debug!(
                identity = %identity,
                attempt,
                attempts = self.policy.attempts,
                "Backend not ready yet"
            );

            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        error!(
            identity = %identity,
            attempts = self.policy.attempts,
            "Backend did not become ready within the poll bound"
        );
        self.notify(
            &session,
            ProvisionEvent::Failed,
            "Backend did not become ready in time",
        )
        .await;
        JobOutcome::Failed
    }

    async fn notify(&self, session: &Option<String>, event: ProvisionEvent, payload: &str) {
        if let Some(session) = session {
            self.notifier.send(session, event, payload).await;
        }
    }
}

fn ready_payload(target: &RoutingTarget, secret: &str) -> String {
    serde_json::json!({
        "target": target,
        "secret": secret,
    })
    .to_string()
}

/// Random access credential injected into the workload's environment
fn new_access_secret() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..12].to_string()
}
