//! Per-request routing decisions
//!
//! [`RoutingEngine::decide`] is the request path's entry point into the
//! core: ready backends are forwarded to, everything else gets the holding
//! response while (at most once per debounce window) a provisioning job is
//! kicked off in the background. The engine itself holds no per-identity
//! state; readiness is a live query and the target is recomputed per
//! request.

use crate::config::UpstreamConfig;
use crate::debounce::StartupDebouncer;
use crate::identity::Identity;
use crate::provision::BackendProvisioner;
use crate::readiness::ReadinessProbe;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Upstream address for a ready backend, derived from the identity.
///
/// Cheap to recompute and never cached, so it can never go stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl RoutingTarget {
    /// Derive the target for `identity`: `{scheme}://{identity}-svc:{port}`
    pub fn derive(identity: &Identity, upstream: &UpstreamConfig) -> Self {
        Self {
            scheme: upstream.scheme.clone(),
            host: identity.endpoint_name(),
            port: upstream.port,
        }
    }

    /// `host:port` form used when rewriting request URIs
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Outcome of a routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Rewrite the upstream target and forward the request
    Forward(RoutingTarget),
    /// Serve the holding response; the backend is not reachable yet
    Hold,
}

/// Decides, per request, between forwarding and holding
pub struct RoutingEngine {
    probe: ReadinessProbe,
    debouncer: Arc<StartupDebouncer>,
    provisioner: Arc<BackendProvisioner>,
    upstream: UpstreamConfig,
}

impl RoutingEngine {
    pub fn new(
        probe: ReadinessProbe,
        debouncer: Arc<StartupDebouncer>,
        provisioner: Arc<BackendProvisioner>,
        upstream: UpstreamConfig,
    ) -> Self {
        Self {
            probe,
            debouncer,
            provisioner,
            upstream,
        }
    }

    /// Decide how to route a request for `identity`.
    ///
    /// Callers must have authenticated the identity already; an
    /// unauthenticated request is rejected at the edge and never reaches
    /// this point. The provisioning job triggered on a miss is detached:
    /// this request returns `Hold` without waiting for it.
    pub async fn decide(&self, identity: &Identity, session: Option<&str>) -> RoutingDecision {
        if self.probe.is_ready(identity).await {
            return RoutingDecision::Forward(RoutingTarget::derive(identity, &self.upstream));
        }

        if self.debouncer.try_acquire(identity) {
            info!(identity = %identity, "Backend not ready, triggering cold start");
            let _job = self
                .provisioner
                .start(identity.clone(), session.map(String::from));
        } else {
            debug!(identity = %identity, "Backend not ready, cold start already in flight");
        }

        RoutingDecision::Hold
    }
}
