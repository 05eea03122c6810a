//! Connection factory
//!
//! Opens a readable byte stream for a task. The engine only talks to the
//! [`Connector`] trait; [`HttpConnector`] is the default implementation on
//! top of the blocking reqwest client.
//!
//! HTTPS connections accept every certificate chain and every hostname. The
//! engine is meant for arbitrary public download mirrors, many of which run
//! with self-signed or mismatched certificates.

use crate::auth::authorization_header;
use crate::error::DlpoolError;
use dlpool_types::{Credential, EngineConfig};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_DISPOSITION};
use reqwest::Method;
use std::fmt;
use std::io::Read;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Filename used when neither the response nor the URL provides one
pub const FALLBACK_FILENAME: &str = "download";

/// Everything a connector needs to open one transfer
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub url: &'a Url,
    pub credential: Option<&'a Credential>,
    /// Read timeout covering the whole transfer
    pub timeout: Duration,
}

/// An open source stream plus the metadata announced by the server
pub struct Connection {
    pub filename: String,
    /// `None` when the length is unknown (chunked or unspecified)
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("filename", &self.filename)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens connections for the download engine
pub trait Connector: Send + Sync {
    fn open(&self, request: &ConnectRequest<'_>) -> Result<Connection, DlpoolError>;
}

/// Default connector backed by reqwest
pub struct HttpConnector {
    /// Used for `http` and `ftp` URLs
    direct: Client,
    /// Used for `https` URLs, with certificate and hostname checks disabled
    secure: Client,
    method: Method,
    headers: HeaderMap,
}

impl HttpConnector {
    /// Build a connector from the engine configuration
    pub fn new(config: &EngineConfig) -> Result<Self, DlpoolError> {
        let method = Method::from_bytes(config.request_method.to_uppercase().as_bytes())
            .map_err(|_| {
                DlpoolError::Config(format!("Invalid request method: {}", config.request_method))
            })?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| DlpoolError::Config(format!("Invalid header name: {}", key)))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|_| DlpoolError::Config(format!("Invalid value for header {}", key)))?;
            headers.insert(name, value);
        }

        let direct = Self::client_builder(config)?.build()?;
        let secure = Self::client_builder(config)?
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            direct,
            secure,
            method,
            headers,
        })
    }

    fn client_builder(
        config: &EngineConfig,
    ) -> Result<reqwest::blocking::ClientBuilder, DlpoolError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout());

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| DlpoolError::Config(format!("Invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        } else {
            // HTTP_PROXY and friends from the environment are ignored
            builder = builder.no_proxy();
        }

        Ok(builder)
    }

    /// Pick the transport for a URL scheme
    fn client_for(&self, url: &Url) -> Result<&Client, DlpoolError> {
        match url.scheme().to_ascii_lowercase().as_str() {
            "http" | "ftp" => Ok(&self.direct),
            "https" => Ok(&self.secure),
            other => Err(DlpoolError::Protocol(other.to_string())),
        }
    }
}

impl Connector for HttpConnector {
    fn open(&self, request: &ConnectRequest<'_>) -> Result<Connection, DlpoolError> {
        let client = self.client_for(request.url)?;

        let mut builder = client
            .request(self.method.clone(), request.url.clone())
            .headers(self.headers.clone())
            .timeout(request.timeout);

        if let Some(credential) = request.credential {
            builder = builder.header(AUTHORIZATION, authorization_header(credential));
        }

        debug!("Opening {} {}", self.method, request.url);
        let response = builder.send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(DlpoolError::Server {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Unexpected status")
                    .to_string(),
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .unwrap_or_else(|| filename_from_url(request.url));
        let content_length = response.content_length();

        Ok(Connection {
            filename,
            content_length,
            reader: Box::new(response),
        })
    }
}

/// Extract the filename from a `Content-Disposition` header value
///
/// Both the `filename=` and the short `fname=` parameter are recognised. The
/// value runs up to the next `;` with surrounding quotes removed.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    ["filename=", "fname="].iter().find_map(|marker| {
        let start = header.find(marker)? + marker.len();
        let value = header[start..]
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Final path segment of a URL, or [`FALLBACK_FILENAME`]
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}
