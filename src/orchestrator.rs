//! Typed façade over the cluster orchestrator's resource API
//!
//! The core consumes the [`Orchestrator`] trait: ensure a workload record,
//! ensure its network endpoint record, and list running instances for an
//! identity. [`ClusterClient`] is the production implementation, speaking
//! the orchestrator's REST resource API directly. The client holds no local
//! cache of orchestrator state; every call is a live query.

use crate::config::{OrchestratorConfig, UpstreamConfig, WorkloadConfig};
use crate::identity::Identity;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors from orchestrator API calls.
///
/// `AlreadyExists` is distinguishable from other failures so that
/// read-then-create callers can treat it as success.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The resource already exists (create raced with another creator)
    #[error("resource already exists")]
    AlreadyExists,
    /// The API rejected the request
    #[error("orchestrator API error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// The API could not be reached
    #[error("orchestrator transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Outcome of an idempotent ensure call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    /// The resource was created by this call
    Created,
    /// The resource already existed
    AlreadyExists,
}

/// Status of one workload instance as reported by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStatus {
    /// Instance process is running
    pub running: bool,
    /// Instance is reachable through its endpoint
    pub reachable: bool,
}

impl InstanceStatus {
    pub fn is_serving(&self) -> bool {
        self.running && self.reachable
    }
}

/// Resource operations the routing core needs from the orchestrator
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Ensure a workload record exists for `identity`.
    ///
    /// Read-then-create-if-absent: a record left over from an earlier
    /// trigger is not an error. `secret` is injected into the workload's
    /// environment as its access credential.
    async fn ensure_workload(
        &self,
        identity: &Identity,
        secret: &str,
    ) -> Result<Ensured, OrchestratorError>;

    /// Ensure the network endpoint record for `identity` exists,
    /// same read-then-create policy.
    async fn ensure_endpoint(&self, identity: &Identity) -> Result<Ensured, OrchestratorError>;

    /// List the current instances running for `identity`. An identity with
    /// no workload record yields an empty list, not an error.
    async fn list_instances(
        &self,
        identity: &Identity,
    ) -> Result<Vec<InstanceStatus>, OrchestratorError>;
}

// === Resource manifests ===
//
// Minimal typed views of the orchestrator's workload (Deployment),
// endpoint (Service), and instance (Pod) resources. Only the fields this
// gateway reads or writes are modeled.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadManifest {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: WorkloadSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    name: String,
    labels: Labels,
}

#[derive(Debug, Serialize)]
struct Labels {
    app: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadSpec {
    replicas: u32,
    selector: Selector,
    template: InstanceTemplate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Selector {
    match_labels: Labels,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceTemplate {
    metadata: TemplateMetadata,
    spec: InstanceSpec,
}

#[derive(Debug, Serialize)]
struct TemplateMetadata {
    labels: Labels,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceSpec {
    containers: Vec<Container>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    name: String,
    image: String,
    env: Vec<EnvVar>,
    ports: Vec<ContainerPort>,
}

#[derive(Debug, Serialize)]
struct EnvVar {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPort {
    container_port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointManifest {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: EndpointSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointSpec {
    selector: Labels,
    ports: Vec<EndpointPort>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointPort {
    port: u16,
    target_port: u16,
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    items: Vec<InstanceRecord>,
}

#[derive(Debug, Deserialize)]
struct InstanceRecord {
    #[serde(default)]
    status: InstanceRecordStatus,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceRecordStatus {
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<InstanceCondition>,
}

#[derive(Debug, Deserialize)]
struct InstanceCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

impl InstanceRecord {
    fn to_status(&self) -> InstanceStatus {
        let running = self.status.phase.as_deref() == Some("Running");
        let reachable = self
            .status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True");
        InstanceStatus { running, reachable }
    }
}

/// Production orchestrator client speaking the cluster's REST resource API
pub struct ClusterClient {
    http: reqwest::Client,
    api_url: String,
    namespace: String,
    auth_token: Option<String>,
    workload: WorkloadConfig,
    upstream: UpstreamConfig,
}

impl ClusterClient {
    pub fn new(
        config: &OrchestratorConfig,
        workload: WorkloadConfig,
        upstream: UpstreamConfig,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build orchestrator HTTP client: {}", e))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            auth_token: config.auth_token.clone(),
            workload,
            upstream,
        })
    }

    fn workloads_url(&self) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/deployments",
            self.api_url, self.namespace
        )
    }

    fn endpoints_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/services",
            self.api_url, self.namespace
        )
    }

    fn instances_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.api_url, self.namespace)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET a named resource; Ok(true) if it exists, Ok(false) on 404
    async fn resource_exists(&self, url: &str) -> Result<bool, OrchestratorError> {
        let response = self.authorize(self.http.get(url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(api_error(status, response).await),
        }
    }

    /// POST a resource manifest; maps 409 to `AlreadyExists`
    async fn create_resource<T: Serialize>(
        &self,
        url: &str,
        manifest: &T,
    ) -> Result<(), OrchestratorError> {
        let response = self
            .authorize(self.http.post(url))
            .json(manifest)
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Err(OrchestratorError::AlreadyExists),
            status if status.is_success() => Ok(()),
            status => Err(api_error(status, response).await),
        }
    }

    fn workload_manifest(&self, identity: &Identity, secret: &str) -> WorkloadManifest {
        let labels = || Labels {
            app: identity.as_str().to_string(),
        };
        WorkloadManifest {
            api_version: "apps/v1",
            kind: "Deployment",
            metadata: Metadata {
                name: identity.workload_name(),
                labels: labels(),
            },
            spec: WorkloadSpec {
                replicas: 1,
                selector: Selector {
                    match_labels: labels(),
                },
                template: InstanceTemplate {
                    metadata: TemplateMetadata { labels: labels() },
                    spec: InstanceSpec {
                        containers: vec![Container {
                            name: "workspace".to_string(),
                            image: self.workload.image.clone(),
                            env: vec![EnvVar {
                                name: self.workload.secret_env.clone(),
                                value: secret.to_string(),
                            }],
                            ports: vec![ContainerPort {
                                container_port: self.workload.container_port,
                            }],
                        }],
                    },
                },
            },
        }
    }

    fn endpoint_manifest(&self, identity: &Identity) -> EndpointManifest {
        EndpointManifest {
            api_version: "v1",
            kind: "Service",
            metadata: Metadata {
                name: identity.endpoint_name(),
                labels: Labels {
                    app: identity.as_str().to_string(),
                },
            },
            spec: EndpointSpec {
                selector: Labels {
                    app: identity.as_str().to_string(),
                },
                ports: vec![EndpointPort {
                    port: self.upstream.port,
                    target_port: self.workload.container_port,
                }],
            },
        }
    }
}

#[async_trait]
impl Orchestrator for ClusterClient {
    async fn ensure_workload(
        &self,
        identity: &Identity,
        secret: &str,
    ) -> Result<Ensured, OrchestratorError> {
        let name = identity.workload_name();
        let read_url = format!("{}/{}", self.workloads_url(), name);

        if self.resource_exists(&read_url).await? {
            debug!(identity = %identity, workload = %name, "Workload record already exists");
            return Ok(Ensured::AlreadyExists);
        }

        let manifest = self.workload_manifest(identity, secret);
        match self.create_resource(&self.workloads_url(), &manifest).await {
            Ok(()) => {
                info!(identity = %identity, workload = %name, "Workload record created");
                Ok(Ensured::Created)
            }
            // Lost a create race; the workload is there, which is all we need
            Err(OrchestratorError::AlreadyExists) => Ok(Ensured::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn ensure_endpoint(&self, identity: &Identity) -> Result<Ensured, OrchestratorError> {
        let name = identity.endpoint_name();
        let read_url = format!("{}/{}", self.endpoints_url(), name);

        if self.resource_exists(&read_url).await? {
            debug!(identity = %identity, endpoint = %name, "Endpoint record already exists");
            return Ok(Ensured::AlreadyExists);
        }

        let manifest = self.endpoint_manifest(identity);
        match self.create_resource(&self.endpoints_url(), &manifest).await {
            Ok(()) => {
                info!(identity = %identity, endpoint = %name, "Endpoint record created");
                Ok(Ensured::Created)
            }
            Err(OrchestratorError::AlreadyExists) => Ok(Ensured::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn list_instances(
        &self,
        identity: &Identity,
    ) -> Result<Vec<InstanceStatus>, OrchestratorError> {
        let response = self
            .authorize(self.http.get(self.instances_url()))
            .query(&[("labelSelector", identity.label_selector())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let list: InstanceList = response.json().await?;
        Ok(list.items.iter().map(InstanceRecord::to_status).collect())
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> OrchestratorError {
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    OrchestratorError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;

    fn test_client() -> ClusterClient {
        ClusterClient::new(
            &OrchestratorConfig::default(),
            WorkloadConfig::default(),
            UpstreamConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_resource_urls() {
        let client = test_client();
        assert_eq!(
            client.workloads_url(),
            "http://127.0.0.1:8001/apis/apps/v1/namespaces/default/deployments"
        );
        assert_eq!(
            client.endpoints_url(),
            "http://127.0.0.1:8001/api/v1/namespaces/default/services"
        );
        assert_eq!(
            client.instances_url(),
            "http://127.0.0.1:8001/api/v1/namespaces/default/pods"
        );
    }

    #[test]
    fn test_workload_manifest_shape() {
        let client = test_client();
        let identity = Identity::parse("alice").unwrap();
        let manifest = client.workload_manifest(&identity, "s3cret");
        let json = serde_json::to_value(&manifest).unwrap();

        assert_eq!(json["apiVersion"], "apps/v1");
        assert_eq!(json["kind"], "Deployment");
        assert_eq!(json["metadata"]["name"], "alice-deploy");
        assert_eq!(json["spec"]["replicas"], 1);
        assert_eq!(json["spec"]["selector"]["matchLabels"]["app"], "alice");
        assert_eq!(
            json["spec"]["template"]["metadata"]["labels"]["app"],
            "alice"
        );

        let container = &json["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], WorkloadConfig::default().image);
        assert_eq!(container["env"][0]["name"], "VNC_PW");
        assert_eq!(container["env"][0]["value"], "s3cret");
        assert_eq!(container["ports"][0]["containerPort"], 6901);
    }

    #[test]
    fn test_endpoint_manifest_shape() {
        let client = test_client();
        let identity = Identity::parse("alice").unwrap();
        let manifest = client.endpoint_manifest(&identity);
        let json = serde_json::to_value(&manifest).unwrap();

        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Service");
        assert_eq!(json["metadata"]["name"], "alice-svc");
        assert_eq!(json["spec"]["selector"]["app"], "alice");
        assert_eq!(json["spec"]["ports"][0]["port"], 8088);
        assert_eq!(json["spec"]["ports"][0]["targetPort"], 6901);
    }

    #[test]
    fn test_instance_record_mapping() {
        let list: InstanceList = serde_json::from_value(serde_json::json!({
            "items": [
                {
                    "status": {
                        "phase": "Running",
                        "conditions": [{"type": "Ready", "status": "True"}]
                    }
                },
                {
                    "status": {
                        "phase": "Running",
                        "conditions": [{"type": "Ready", "status": "False"}]
                    }
                },
                {
                    "status": {"phase": "Pending"}
                },
                {}
            ]
        }))
        .unwrap();

        let statuses: Vec<InstanceStatus> =
            list.items.iter().map(InstanceRecord::to_status).collect();

        assert_eq!(statuses.len(), 4);
        assert!(statuses[0].is_serving());
        assert!(statuses[1].running);
        assert!(!statuses[1].reachable);
        assert!(!statuses[2].running);
        assert!(!statuses[3].running);
    }

    #[test]
    fn test_empty_instance_list_parses() {
        let list: InstanceList = serde_json::from_str("{}").unwrap();
        assert!(list.items.is_empty());
    }
}
