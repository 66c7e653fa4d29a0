//! Best-effort push notifications to waiting client sessions
//!
//! The provisioner reports job progress through the [`NotificationChannel`]
//! capability trait; the core has no dependency on any particular real-time
//! transport. [`PushGateway`] posts events to an external relay that owns
//! the live session connections. Delivery is best-effort by contract: a
//! stale or disconnected session makes the send a no-op, never an error.

use crate::config::NotifierConfig;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Lifecycle events a provisioning job reports to its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionEvent {
    /// Provisioning has been triggered
    Starting,
    /// The backend is reachable; payload carries the routing target
    Ready,
    /// Provisioning failed or timed out; a fresh request is needed to retry
    Failed,
}

impl ProvisionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionEvent::Starting => "starting",
            ProvisionEvent::Ready => "ready",
            ProvisionEvent::Failed => "failed",
        }
    }
}

/// Addressable sink for per-session provisioning events
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver `event` to the session identified by `session`.
    ///
    /// Must not fail: delivery problems are the implementation's to log
    /// and swallow. A provisioning job's job is resource creation, not
    /// notification guarantee.
    async fn send(&self, session: &str, event: ProvisionEvent, payload: &str);
}

/// Envelope posted to the push relay
#[derive(Debug, Serialize)]
struct PushEnvelope<'a> {
    session: &'a str,
    event: &'a str,
    payload: &'a str,
    timestamp: String,
}

/// Notification adapter posting JSON envelopes to an external push relay
pub struct PushGateway {
    http: reqwest::Client,
    push_url: String,
}

impl PushGateway {
    pub fn new(push_url: String, config: &NotifierConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build push HTTP client: {}", e))?;

        Ok(Self { http, push_url })
    }
}

#[async_trait]
impl NotificationChannel for PushGateway {
    async fn send(&self, session: &str, event: ProvisionEvent, payload: &str) {
        let envelope = PushEnvelope {
            session,
            event: event.as_str(),
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        match self.http.post(&self.push_url).json(&envelope).send().await {
            Ok(response) if !response.status().is_success() => {
                debug!(
                    session,
                    event = event.as_str(),
                    status = %response.status(),
                    "Push relay rejected notification"
                );
            }
            Ok(_) => {}
            Err(e) => {
                debug!(
                    session,
                    event = event.as_str(),
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }
    }
}

/// Sink used when no push relay is configured: logs and drops every event
pub struct NullNotifier;

#[async_trait]
impl NotificationChannel for NullNotifier {
    async fn send(&self, session: &str, event: ProvisionEvent, _payload: &str) {
        debug!(
            session,
            event = event.as_str(),
            "No push relay configured, dropping notification"
        );
    }
}
