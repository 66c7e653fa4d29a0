use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Edge server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Orchestrator API connection
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Fixed template for provisioned workloads
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Upstream target derivation
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cold-start provisioning behavior
    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    /// Push notification relay
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Name of the cookie carrying the authenticated identity
    #[serde(default = "default_identity_cookie")]
    pub identity_cookie: String,

    /// Path to a holding page file (overrides the built-in page)
    pub holding_page: Option<String>,

    /// Request timeout in seconds when forwarding upstream (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections per upstream host (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Path to PID file (optional)
    pub pid_file: Option<String>,

    /// Enable TLS (default: false). If true without cert/key, generates self-signed.
    #[serde(default)]
    pub tls: bool,

    /// Path to TLS certificate file (PEM format)
    pub tls_cert: Option<String>,

    /// Path to TLS private key file (PEM format)
    pub tls_key: Option<String>,
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls || self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn has_tls_files(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            identity_cookie: default_identity_cookie(),
            holding_page: None,
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pid_file: None,
            tls: false,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Connection settings for the cluster orchestrator's resource API
#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Base URL of the orchestrator API (default: http://127.0.0.1:8001,
    /// the address of a local API proxy)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Namespace that workload and endpoint records are created in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bearer token for API authentication (optional)
    pub auth_token: Option<String>,

    /// Per-call timeout in seconds for orchestrator API requests (default: 10)
    #[serde(default = "default_orchestrator_timeout")]
    pub request_timeout_secs: u64,
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            namespace: default_namespace(),
            auth_token: None,
            request_timeout_secs: default_orchestrator_timeout(),
        }
    }
}

/// Fixed template for provisioned backend workloads.
///
/// Every identity gets the same image and port layout; per-identity
/// workload configuration is deliberately out of scope.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkloadConfig {
    /// Container image to run
    #[serde(default = "default_workload_image")]
    pub image: String,

    /// Port the container listens on
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Environment variable the access secret is injected as
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: default_workload_image(),
            container_port: default_container_port(),
            secret_env: default_secret_env(),
        }
    }
}

/// How routing targets are derived from an identity.
///
/// The endpoint record fronting an identity's workload listens on `port`;
/// the gateway forwards to `{scheme}://{identity}-svc:{port}`.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Scheme used when forwarding (default: http)
    #[serde(default = "default_upstream_scheme")]
    pub scheme: String,

    /// Port the endpoint record exposes (default: 8088)
    #[serde(default = "default_upstream_port")]
    pub port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            scheme: default_upstream_scheme(),
            port: default_upstream_port(),
        }
    }
}

/// Cold-start provisioning behavior
#[derive(Debug, Deserialize, Clone)]
pub struct ProvisionerConfig {
    /// Debounce window in seconds: repeated provisioning triggers for the
    /// same identity are suppressed for this long (default: 300)
    #[serde(default = "default_debounce_ttl")]
    pub debounce_ttl_secs: u64,

    /// Number of readiness poll attempts before a job fails (default: 30)
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Delay between readiness poll attempts in milliseconds (default: 2000)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl ProvisionerConfig {
    pub fn debounce_ttl(&self) -> Duration {
        Duration::from_secs(self.debounce_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            debounce_ttl_secs: default_debounce_ttl(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Push notification relay settings
#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    /// URL of the push relay that delivers events to browser sessions.
    /// When absent, provisioning events are logged but not delivered.
    pub push_url: Option<String>,

    /// Delivery timeout in seconds (default: 5)
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            push_url: None,
            timeout_secs: default_notifier_timeout(),
        }
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_identity_cookie() -> String {
    "wakegate_user".to_string()
}

fn default_request_timeout() -> u64 {
    30 // 30 seconds max for upstream to respond
}

fn default_pool_max_idle_per_host() -> usize {
    10 // Keep up to 10 idle connections per upstream
}

fn default_pool_idle_timeout() -> u64 {
    90 // Close idle connections after 90 seconds
}

fn default_api_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_orchestrator_timeout() -> u64 {
    10
}

fn default_workload_image() -> String {
    "kasmweb/firefox:1.17.0-rolling-daily".to_string()
}

fn default_container_port() -> u16 {
    6901
}

fn default_secret_env() -> String {
    "VNC_PW".to_string()
}

fn default_upstream_scheme() -> String {
    "http".to_string()
}

fn default_upstream_port() -> u16 {
    8088
}

fn default_debounce_ttl() -> u64 {
    300 // 5 minutes
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval() -> u64 {
    2000 // 2 seconds, linear
}

fn default_notifier_timeout() -> u64 {
    5
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.upstream.port == 0 {
            errors.push("upstream.port must be greater than 0".to_string());
        }
        if self.workload.container_port == 0 {
            errors.push("workload.container_port must be greater than 0".to_string());
        }
        if self.workload.image.is_empty() {
            errors.push("workload.image must not be empty".to_string());
        }
        if self.orchestrator.api_url.is_empty() {
            errors.push("orchestrator.api_url must not be empty".to_string());
        }
        if self.provisioner.poll_attempts == 0 {
            errors.push("provisioner.poll_attempts must be greater than 0".to_string());
        }
        match self.upstream.scheme.as_str() {
            "http" | "https" => {}
            other => errors.push(format!(
                "upstream.scheme must be http or https, got '{}'",
                other
            )),
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9090
bind = "127.0.0.1"

[orchestrator]
api_url = "https://orchestrator.internal:6443"
namespace = "workspaces"
auth_token = "secret"

[workload]
image = "kasmweb/chrome:latest"
container_port = 6901

[upstream]
scheme = "http"
port = 8088

[provisioner]
debounce_ttl_secs = 120
poll_attempts = 10
poll_interval_ms = 500

[notifier]
push_url = "http://127.0.0.1:7070/push"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.orchestrator.namespace, "workspaces");
        assert_eq!(config.orchestrator.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.workload.image, "kasmweb/chrome:latest");
        assert_eq!(config.upstream.port, 8088);
        assert_eq!(config.provisioner.debounce_ttl_secs, 120);
        assert_eq!(config.provisioner.poll_attempts, 10);
        assert_eq!(
            config.notifier.push_url.as_deref(),
            Some("http://127.0.0.1:7070/push")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.identity_cookie, "wakegate_user");
        assert_eq!(config.orchestrator.api_url, "http://127.0.0.1:8001");
        assert_eq!(config.orchestrator.namespace, "default");
        assert_eq!(config.upstream.scheme, "http");
        assert_eq!(config.upstream.port, 8088);
        assert_eq!(config.provisioner.debounce_ttl_secs, 300);
        assert_eq!(config.provisioner.poll_attempts, 30);
        assert_eq!(config.provisioner.poll_interval_ms, 2000);
        assert!(config.notifier.push_url.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_duration_accessors() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.provisioner.debounce_ttl(), Duration::from_secs(300));
        assert_eq!(
            config.provisioner.poll_interval(),
            Duration::from_millis(2000)
        );
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.orchestrator.request_timeout(),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let config: Config = toml::from_str(
            r#"
[upstream]
scheme = "ftp"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("upstream.scheme"));
    }

    #[test]
    fn test_validate_rejects_zero_ports_and_attempts() {
        let config: Config = toml::from_str(
            r#"
[upstream]
port = 0

[provisioner]
poll_attempts = 0
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("upstream.port"));
        assert!(err.contains("poll_attempts"));
    }

    #[test]
    fn test_tls_enabled() {
        let mut config = ServerConfig::default();
        assert!(!config.tls_enabled());

        config.tls = true;
        assert!(config.tls_enabled());

        config.tls = false;
        config.tls_cert = Some("cert.pem".to_string());
        assert!(!config.tls_enabled());

        config.tls_key = Some("key.pem".to_string());
        assert!(config.tls_enabled());
        assert!(config.has_tls_files());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8443\ntls = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8443);
        assert!(config.server.tls_enabled());
    }
}
