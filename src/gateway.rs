//! HTTP edge server: authenticates the identity cookie, consults the
//! routing engine, and either forwards upstream or serves the holding page

use crate::config::ServerConfig;
use crate::error::{json_error_response, GatewayErrorCode};
use crate::identity::Identity;
use crate::pool::UpstreamPool;
use crate::routing::{RoutingDecision, RoutingEngine};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Built-in holding page, used unless the config points at a file
pub const DEFAULT_HOLDING_PAGE: &str = include_str!("../assets/holding.html");

/// Per-request state shared by all connections
struct RequestContext {
    engine: Arc<RoutingEngine>,
    pool: Arc<UpstreamPool>,
    identity_cookie: String,
    holding_page: String,
    request_timeout: Duration,
}

/// The gateway edge server
pub struct GatewayServer {
    bind_addr: SocketAddr,
    context: Arc<RequestContext>,
    shutdown_rx: watch::Receiver<bool>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        engine: Arc<RoutingEngine>,
        pool: Arc<UpstreamPool>,
        config: &ServerConfig,
        holding_page: String,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            context: Arc::new(RequestContext {
                engine,
                pool,
                identity_cookie: config.identity_cookie.clone(),
                holding_page,
                request_timeout: config.request_timeout(),
            }),
            shutdown_rx,
            tls_acceptor: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let protocol = if self.tls_acceptor.is_some() { "HTTPS" } else { "HTTP" };
        info!(addr = %self.bind_addr, protocol, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let tls_acceptor = self.tls_acceptor.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let context = Arc::clone(&self.context);
                            let tls_acceptor = tls_acceptor.clone();

                            tokio::spawn(async move {
                                if let Some(acceptor) = tls_acceptor {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            if let Err(e) = handle_connection(tls_stream, addr, context, true).await {
                                                debug!(addr = %addr, error = %e, "TLS connection error");
                                            }
                                        }
                                        Err(e) => {
                                            debug!(addr = %addr, error = %e, "TLS handshake failed");
                                        }
                                    }
                                } else if let Err(e) = handle_connection(stream, addr, context, false).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    context: Arc<RequestContext>,
    is_tls: bool,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let context = Arc::clone(&context);
        async move { handle_request(req, context, addr, is_tls).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    context: Arc<RequestContext>,
    client_addr: SocketAddr,
    is_tls: bool,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Login endpoints are handled before identity extraction
    match req.uri().path() {
        "/login" => return Ok(handle_login(&req, &context.identity_cookie)),
        "/logout" => return Ok(handle_logout(&context.identity_cookie)),
        _ => {}
    }

    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Resolve the authenticated identity from the session cookie.
    // Requests without one never reach the routing engine.
    let identity = match extract_identity(req.headers(), &context.identity_cookie) {
        Some(identity) => identity,
        None => {
            return Ok(json_error_response(
                GatewayErrorCode::NotAuthenticated,
                "Not authenticated",
            ));
        }
    };

    // Optional session handle for provisioning notifications
    let session = query_param(req.uri(), "cid");

    // Add proxy headers
    // Security: We overwrite X-Forwarded-* headers rather than appending to
    // prevent client spoofing. This gateway is assumed to be the first
    // trusted hop.
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let proto = if is_tls { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    debug!(identity = %identity, method = %req.method(), uri = %req.uri(), request_id, "Incoming request");

    match context.engine.decide(&identity, session.as_deref()).await {
        RoutingDecision::Hold => Ok(holding_response(&context.holding_page)),
        RoutingDecision::Forward(target) => {
            let result =
                tokio::time::timeout(context.request_timeout, context.pool.forward(req, &target))
                    .await;

            match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => {
                    // Log detailed error internally, return generic message externally
                    error!(identity = %identity, target = %target, error = %e, "Failed to forward request");
                    Ok(json_error_response(
                        GatewayErrorCode::UpstreamConnectFailed,
                        "Failed to connect to backend",
                    ))
                }
                Err(_) => {
                    warn!(
                        identity = %identity,
                        target = %target,
                        timeout_secs = context.request_timeout.as_secs(),
                        "Upstream request timed out"
                    );
                    Ok(json_error_response(
                        GatewayErrorCode::UpstreamTimeout,
                        format!(
                            "Request timed out after {} seconds",
                            context.request_timeout.as_secs()
                        ),
                    ))
                }
            }
        }
    }
}

/// Serve the static holding page for a backend that is not ready yet
fn holding_response(page: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(hyper::header::CACHE_CONTROL, "no-store")
        .body(
            Full::new(Bytes::from(page.to_string()))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response builder")
}

/// `/login?user=<name>`: validate the name and set the identity cookie
fn handle_login(
    req: &Request<Incoming>,
    cookie_name: &str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let user = match query_param(req.uri(), "user") {
        Some(user) => user,
        None => {
            return json_error_response(
                GatewayErrorCode::BadLoginRequest,
                "Missing ?user=username",
            );
        }
    };

    let identity = match Identity::parse(&user) {
        Some(identity) => identity,
        None => {
            return json_error_response(
                GatewayErrorCode::BadLoginRequest,
                "Invalid username: lowercase letters, digits, and hyphens only",
            );
        }
    };

    info!(identity = %identity, "Session signed in");

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        cookie_name,
        identity.as_str()
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::SET_COOKIE, cookie)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(
            Full::new(Bytes::from(format!("Logged in as {}", identity)))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response builder")
}

/// `/logout`: expire the identity cookie
fn handle_logout(cookie_name: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    let cookie = format!("{}=; Path=/; HttpOnly; Max-Age=0", cookie_name);
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::SET_COOKIE, cookie)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(
            Full::new(Bytes::from("Logged out"))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response builder")
}

/// Extract and validate the identity from the session cookie
fn extract_identity(headers: &HeaderMap, cookie_name: &str) -> Option<Identity> {
    for header in headers.get_all(hyper::header::COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, cookie_value)) = pair.trim().split_once('=') {
                if name == cookie_name {
                    return Identity::parse(cookie_value);
                }
            }
        }
    }
    None
}

/// Get a query parameter's value from a request URI
fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            hyper::header::COOKIE,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_extract_identity_from_cookie() {
        let headers = headers_with_cookie("wakegate_user=alice");
        let identity = extract_identity(&headers, "wakegate_user").unwrap();
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn test_extract_identity_among_multiple_cookies() {
        let headers = headers_with_cookie("theme=dark; wakegate_user=alice; lang=en");
        let identity = extract_identity(&headers, "wakegate_user").unwrap();
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn test_extract_identity_missing_cookie() {
        let headers = headers_with_cookie("theme=dark");
        assert!(extract_identity(&headers, "wakegate_user").is_none());

        let empty = HeaderMap::new();
        assert!(extract_identity(&empty, "wakegate_user").is_none());
    }

    #[test]
    fn test_extract_identity_rejects_invalid_value() {
        // A tampered cookie with an invalid identity is not authenticated
        let headers = headers_with_cookie("wakegate_user=../../etc");
        assert!(extract_identity(&headers, "wakegate_user").is_none());

        let headers = headers_with_cookie("wakegate_user=");
        assert!(extract_identity(&headers, "wakegate_user").is_none());
    }

    #[test]
    fn test_query_param() {
        let uri: Uri = "/app?cid=conn-123&x=1".parse().unwrap();
        assert_eq!(query_param(&uri, "cid").as_deref(), Some("conn-123"));
        assert_eq!(query_param(&uri, "x").as_deref(), Some("1"));
        assert!(query_param(&uri, "missing").is_none());

        let uri: Uri = "/app".parse().unwrap();
        assert!(query_param(&uri, "cid").is_none());

        let uri: Uri = "/app?cid=".parse().unwrap();
        assert!(query_param(&uri, "cid").is_none());
    }

    #[test]
    fn test_holding_response_shape() {
        let response = holding_response("<html>hold</html>");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(hyper::header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            response.headers().get(hyper::header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }

    #[test]
    fn test_default_holding_page_is_html() {
        assert!(DEFAULT_HOLDING_PAGE.contains("<html"));
    }
}
