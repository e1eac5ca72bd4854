/// HTTP transport for supervisord's XML-RPC endpoint.
///
/// supervisord listens either on an inet socket (`http://host:port`) or a
/// unix domain socket (`unix:///path/to/supervisor.sock`); both serve the RPC
/// interface at `/RPC2`.  One connection is opened per call.
use std::path::PathBuf;

use base64::Engine as _;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE, HOST};
use hyper::Request;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use url::{Host, Url};

pub const RPC_PATH: &str = "/RPC2";
const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response body is not UTF-8")]
    NotUtf8,

    #[cfg(not(unix))]
    #[error("unix domain sockets are not supported on this platform")]
    UnixUnsupported,
}

/// Where the RPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    /// Parses a `SUPERVISOR_SERVER_URL` value.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        match parsed.scheme() {
            "unix" => {
                // `unix:///abs.sock` has an empty host; `unix://rel.sock` puts
                // the first path segment in the host slot.
                let raw = format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path());
                let path = urlencoding::decode(&raw).map_err(|_| invalid("socket path is not UTF-8"))?;
                if path.is_empty() {
                    return Err(invalid("missing socket path"));
                }
                Ok(Endpoint::Unix(PathBuf::from(path.into_owned())))
            }
            "http" => {
                let host = match parsed.host() {
                    Some(Host::Domain(domain)) => domain.to_string(),
                    Some(Host::Ipv4(addr)) => addr.to_string(),
                    Some(Host::Ipv6(addr)) => addr.to_string(),
                    None => return Err(invalid("missing host")),
                };
                let port = parsed.port_or_known_default().unwrap_or(DEFAULT_HTTP_PORT);
                Ok(Endpoint::Tcp { host, port })
            }
            _ => Err(invalid("expected an http:// or unix:// URL")),
        }
    }

    fn host_header(&self) -> String {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => format!("[{host}]:{port}"),
            Endpoint::Tcp { host, port } => format!("{host}:{port}"),
            Endpoint::Unix(_) => "localhost".to_string(),
        }
    }
}

/// Posts XML-RPC bodies to an [`Endpoint`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: Endpoint,
    authorization: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            authorization: None,
        }
    }

    /// Sends HTTP basic credentials with every request.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        self.authorization = Some(format!("Basic {token}"));
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// POSTs `body` to [`RPC_PATH`] and returns the response body.
    pub async fn post(&self, body: String) -> Result<String, TransportError> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                self.exchange(stream, body).await
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                self.exchange(stream, body).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::UnixUnsupported),
        }
    }

    async fn exchange<S>(&self, stream: S, body: String) -> Result<String, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("[rpc] Connection closed with error: {e}");
            }
        });

        let mut builder = Request::post(RPC_PATH)
            .header(HOST, self.endpoint.host_header())
            .header(CONTENT_TYPE, "text/xml")
            .header(CONNECTION, "close");
        if let Some(auth) = &self.authorization {
            builder = builder.header(AUTHORIZATION, auth.as_str());
        }
        let request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let text = String::from_utf8(bytes.to_vec()).map_err(|_| TransportError::NotUtf8)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text.trim().chars().take(200).collect(),
            });
        }
        Ok(text)
    }
}
