//! HTTP Client for Filter List Downloads
//!
//! Uses hyper with tokio for HTTP/1.1.
//! Features:
//! - Automatic HTTPS with rustls (memory-safe TLS)
//! - Same-origin redirect policy: a list server may move a file around on
//!   its own host, but never hand the download off to a different origin
//! - Overall request timeout and response size cap

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HOST, LOCATION, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use url::{Host, Url};

/// HTTP client errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Body read error: {0}")]
    BodyError(String),

    #[error("Server answered with status {0}")]
    Status(u16),

    #[error("Gave up after {0} redirects")]
    TooManyRedirects(usize),

    #[error("Refusing cross-origin redirect to {0}")]
    CrossOriginRedirect(String),
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout, redirects included
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
    /// Maximum response body size
    pub max_body_size: usize,
    /// Maximum number of same-origin redirects to follow
    pub max_redirects: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("Skiff/{}", env!("CARGO_PKG_VERSION")),
            max_body_size: 32 * 1024 * 1024, // EasyList is a few MB
            max_redirects: 5,
        }
    }
}

/// HTTP response wrapper
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
    /// Time to first byte of the final hop
    pub ttfb: Duration,
    /// Total download time
    pub total_time: Duration,
    /// Final URL (after redirects)
    pub final_url: Url,
}

impl Response {
    /// Check if response was successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get body as string
    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }
}

/// Client statistics
#[derive(Debug, Default)]
pub struct ClientStats {
    pub requests_made: AtomicU64,
    pub redirects_followed: AtomicU64,
    pub bytes_downloaded: AtomicU64,
}

/// Minimal HTTP/1.1 client
pub struct HttpClient {
    config: HttpClientConfig,
    tls: TlsConnector,
    stats: ClientStats,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        info!(
            "HTTP client initialized (timeout: {:?}, max redirects: {})",
            config.timeout, config.max_redirects
        );

        Self {
            config,
            tls: TlsConnector::from(Arc::new(tls_config)),
            stats: ClientStats::default(),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HttpClientConfig::default())
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Perform a GET request, following same-origin redirects
    pub async fn get(&self, url: &Url) -> Result<Response, HttpError> {
        let start = Instant::now();
        tokio::time::timeout(self.config.timeout, self.follow_redirects(url, start))
            .await
            .map_err(|_| HttpError::Timeout)?
    }

    async fn follow_redirects(&self, url: &Url, start: Instant) -> Result<Response, HttpError> {
        let mut current = url.clone();

        for _ in 0..=self.config.max_redirects {
            let (status, headers, body, ttfb) = self.send_once(&current).await?;

            if status.is_redirection() {
                if let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) {
                    let next = current
                        .join(location)
                        .map_err(|e| HttpError::InvalidUrl(e.to_string()))?;

                    if next.origin() != current.origin() {
                        return Err(HttpError::CrossOriginRedirect(next.to_string()));
                    }

                    debug!("Redirect {} -> {} ({})", current, next, status);
                    self.stats.redirects_followed.fetch_add(1, Ordering::Relaxed);
                    current = next;
                    continue;
                }
            }

            return Ok(Response {
                status,
                headers,
                body,
                ttfb,
                total_time: start.elapsed(),
                final_url: current,
            });
        }

        Err(HttpError::TooManyRedirects(self.config.max_redirects))
    }

    /// One request/response exchange on a fresh connection
    async fn send_once(
        &self,
        url: &Url,
    ) -> Result<(StatusCode, HeaderMap, Vec<u8>, Duration), HttpError> {
        self.stats.requests_made.fetch_add(1, Ordering::Relaxed);

        let is_https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(HttpError::InvalidUrl(format!("unsupported scheme `{other}`"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl("No host in URL".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::InvalidUrl("No port for URL".to_string()))?;

        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let request = Request::builder()
            .method(Method::GET)
            .uri(target)
            .header(HOST, host_header)
            .header(USER_AGENT, &self.config.user_agent)
            .body(Full::new(Bytes::new()))
            .map_err(|e| HttpError::HttpError(e.to_string()))?;

        let connect = TcpStream::connect((connect_host(url)?, port));
        let stream = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| HttpError::Timeout)?
            .map_err(|e| HttpError::ConnectionFailed(e.to_string()))?;

        let ttfb_start = Instant::now();
        let response = if is_https {
            let server_name = server_name(url)?;

            let tls_stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| HttpError::TlsError(e.to_string()))?;

            exchange(tls_stream, request).await?
        } else {
            exchange(stream, request).await?
        };
        let ttfb = ttfb_start.elapsed();

        let status = response.status();
        let headers = response.headers().clone();

        let collected = Limited::new(response.into_body(), self.config.max_body_size)
            .collect()
            .await
            .map_err(|e| HttpError::BodyError(e.to_string()))?;
        let body = collected.to_bytes().to_vec();

        self.stats
            .bytes_downloaded
            .fetch_add(body.len() as u64, Ordering::Relaxed);

        debug!(
            "HTTP GET {} -> {} ({} bytes, {:?} TTFB)",
            url,
            status,
            body.len(),
            ttfb
        );

        Ok((status, headers, body, ttfb))
    }

    /// Get client statistics: (requests, redirects, bytes)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.requests_made.load(Ordering::Relaxed),
            self.stats.redirects_followed.load(Ordering::Relaxed),
            self.stats.bytes_downloaded.load(Ordering::Relaxed),
        )
    }
}

/// Drive a single HTTP/1.1 exchange over an established stream
/// Host to dial, with IPv6 literals unbracketed
fn connect_host(url: &Url) -> Result<String, HttpError> {
    match url.host() {
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        Some(host) => Ok(host.to_string()),
        None => Err(HttpError::InvalidUrl("No host in URL".to_string())),
    }
}

/// TLS server name; IP literals verify against IP SANs
fn server_name(url: &Url) -> Result<ServerName<'static>, HttpError> {
    match url.host() {
        Some(Host::Domain(domain)) => ServerName::try_from(domain.to_string())
            .map_err(|_| HttpError::TlsError(format!("Invalid server name `{domain}`"))),
        Some(Host::Ipv4(ip)) => Ok(ServerName::from(IpAddr::V4(ip))),
        Some(Host::Ipv6(ip)) => Ok(ServerName::from(IpAddr::V6(ip))),
        None => Err(HttpError::InvalidUrl("No host in URL".to_string())),
    }
}

async fn exchange<S>(
    stream: S,
    request: Request<Full<Bytes>>,
) -> Result<hyper::Response<Incoming>, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HttpError::HttpError(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("Connection error: {}", e);
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| HttpError::HttpError(e.to_string()))
}
