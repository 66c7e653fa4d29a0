use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use wakegate::config::Config;
use wakegate::debounce::StartupDebouncer;
use wakegate::gateway::{GatewayServer, DEFAULT_HOLDING_PAGE};
use wakegate::notify::{NotificationChannel, NullNotifier, PushGateway};
use wakegate::orchestrator::{ClusterClient, Orchestrator};
use wakegate::pool::{PoolConfig, UpstreamPool};
use wakegate::provision::{BackendProvisioner, PollPolicy};
use wakegate::readiness::ReadinessProbe;
use wakegate::routing::RoutingEngine;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wakegate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?
    } else {
        warn!(path = %config_path.display(), "Configuration file not found, using defaults");
        toml::from_str("").expect("empty config parses to defaults")
    };

    print_startup_banner(&config);

    // Write PID file if configured (with exclusive lock on Unix)
    let pid_file_path = config.server.pid_file.as_ref().map(PathBuf::from);
    let _pid_file = if let Some(ref path) = pid_file_path {
        let pid_file = write_pid_file(path)?;
        info!(path = %path.display(), "PID file written and locked");
        Some(pid_file)
    } else {
        None
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Orchestrator client
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(ClusterClient::new(
        &config.orchestrator,
        config.workload.clone(),
        config.upstream.clone(),
    )?);

    // Notification sink for provisioning events
    let notifier: Arc<dyn NotificationChannel> = match &config.notifier.push_url {
        Some(url) => {
            info!(url = %url, "Push notification relay configured");
            Arc::new(PushGateway::new(url.clone(), &config.notifier)?)
        }
        None => {
            warn!("No push relay configured; provisioning events will be logged only");
            Arc::new(NullNotifier)
        }
    };

    // Routing core
    let probe = ReadinessProbe::new(Arc::clone(&orchestrator));
    let debouncer = Arc::new(StartupDebouncer::new(config.provisioner.debounce_ttl()));
    let provisioner = BackendProvisioner::new(
        Arc::clone(&orchestrator),
        notifier,
        PollPolicy::from(&config.provisioner),
        config.upstream.clone(),
    );
    let engine = Arc::new(RoutingEngine::new(
        probe,
        debouncer,
        provisioner,
        config.upstream.clone(),
    ));

    // Upstream connection pool
    let pool_config = PoolConfig {
        max_idle_per_host: config.server.pool_max_idle_per_host,
        idle_timeout: config.server.pool_idle_timeout(),
    };
    info!(
        max_idle = pool_config.max_idle_per_host,
        idle_timeout_secs = pool_config.idle_timeout.as_secs(),
        "Upstream pool configured"
    );
    let pool = Arc::new(UpstreamPool::new(pool_config));

    // Holding page content
    let holding_page = match &config.server.holding_page {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read holding page '{}': {}", path, e)
        })?,
        None => DEFAULT_HOLDING_PAGE.to_string(),
    };

    // Load TLS configuration if enabled
    let tls_acceptor = if config.server.tls_enabled() {
        let (certs, key) = if config.server.has_tls_files() {
            let cert_path = config.server.tls_cert.as_ref().expect("checked by has_tls_files");
            let key_path = config.server.tls_key.as_ref().expect("checked by has_tls_files");
            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            info!(cert = %cert_path, key = %key_path, "TLS enabled with provided certificates");
            (certs, key)
        } else {
            let (certs, key) = generate_self_signed_cert()?;
            warn!("TLS enabled with auto-generated self-signed certificate (not for production)");
            (certs, key)
        };

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("TLS configuration error: {}", e))?;

        Some(TlsAcceptor::from(Arc::new(tls_config)))
    } else {
        None
    };

    // Create the gateway server
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let mut server = GatewayServer::new(
        bind_addr,
        engine,
        pool,
        &config.server,
        holding_page,
        shutdown_rx.clone(),
    );
    if let Some(acceptor) = tls_acceptor {
        server = server.with_tls(acceptor);
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and wait for the server to stop (with timeout)
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    // Clean up PID file
    if let Some(ref path) = pid_file_path {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// PID file handle that maintains an exclusive lock
#[cfg(unix)]
struct PidFile {
    _file: std::fs::File,
}

#[cfg(unix)]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Try to acquire exclusive lock (non-blocking)
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                anyhow::bail!("Another instance is already running (PID file is locked)");
            }
            return Err(err.into());
        }

        // Write PID
        let pid = std::process::id();
        use std::io::Write;
        writeln!(&file, "{}", pid)?;

        // Keep the file handle open to maintain the lock
        Ok(Self { _file: file })
    }
}

#[cfg(not(unix))]
struct PidFile;

#[cfg(not(unix))]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        let pid = std::process::id();
        let mut file = std::fs::File::create(path)?;
        use std::io::Write;
        writeln!(file, "{}", pid)?;
        Ok(Self)
    }
}

fn write_pid_file(path: &Path) -> anyhow::Result<PidFile> {
    PidFile::create(path)
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        tls = config.server.tls_enabled(),
        identity_cookie = %config.server.identity_cookie,
        "Server configuration"
    );
    info!(
        api_url = %config.orchestrator.api_url,
        namespace = %config.orchestrator.namespace,
        "Orchestrator configuration"
    );
    info!(
        image = %config.workload.image,
        container_port = config.workload.container_port,
        upstream_scheme = %config.upstream.scheme,
        upstream_port = config.upstream.port,
        "Workload template"
    );
    info!(
        debounce_ttl_secs = config.provisioner.debounce_ttl_secs,
        poll_attempts = config.provisioner.poll_attempts,
        poll_interval_ms = config.provisioner.poll_interval_ms,
        "Provisioner settings"
    );
}

fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate file {}: {}", path, e))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificates from {}: {}", path, e))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }

    Ok(certs)
}

fn load_key(path: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open key file {}: {}", path, e))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse key from {}: {}", path, e))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => break,
            _ => continue,
        }
    }

    anyhow::bail!("No private key found in {}", path)
}

fn generate_self_signed_cert(
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let subject_alt_names = vec!["localhost".to_string(), "127.0.0.1".to_string()];

    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(subject_alt_names)
        .map_err(|e| anyhow::anyhow!("Failed to generate self-signed certificate: {}", e))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
        .map_err(|e| anyhow::anyhow!("Failed to serialize private key: {}", e))?;

    Ok((vec![cert_der], key_der))
}
