//! HTTP transport used for repodata and package downloads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::Config;
use crate::error::Error;

/// Why a single GET failed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connect or read deadline exceeded.
    #[error("timed out fetching {0}")]
    Timeout(String),

    /// DNS, TCP or TLS failure.
    #[error("connection failed for {url}: {message}")]
    Connection {
        /// Requested URL.
        url: String,
        /// Underlying error text.
        message: String,
    },

    /// Server answered with a non-2xx status.
    #[error("HTTP {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Local file (for `file://` URLs) could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches a URL into memory.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`, giving up after `timeout`.
    async fn get(&self, url: &str, timeout: Duration) -> Result<Bytes, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Bytes, TransportError> {
        (**self).get(url, timeout).await
    }
}

/// Local path of a `file://` URL, if it is one.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

/// [`Transport`] backed by reqwest; also serves `file://` URLs from disk.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client from the network and SSL settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the CA bundle cannot be read or
    /// parsed, or the client cannot be built.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(config.connect_timeout());

        if config.ssl_verify {
            match config.ca_bundle() {
                Some(path) => {
                    tracing::debug!("Using CA bundle {}", path.display());
                    let pem = std::fs::read(&path).map_err(|e| {
                        Error::Configuration(format!(
                            "cannot read CA bundle {}: {e}",
                            path.display()
                        ))
                    })?;
                    let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                        Error::Configuration(format!("invalid CA bundle {}: {e}", path.display()))
                    })?;
                    for cert in certs {
                        builder = builder.add_root_certificate(cert);
                    }
                }
                None => {
                    tracing::warn!("No CA certificates found on system, disabling SSL verification");
                    builder = builder.danger_accept_invalid_certs(true);
                }
            }
        } else {
            tracing::warn!("SSL verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Bytes, TransportError> {
        if let Some(path) = file_url_path(url) {
            let bytes = tokio::fs::read(&path).await?;
            return Ok(Bytes::from(bytes));
        }

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(url.to_string())
            } else {
                TransportError::Connection {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(classify)
    }
}
