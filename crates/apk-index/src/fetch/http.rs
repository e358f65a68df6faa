//! HTTP layer: transport seam, retrying default client, status mapping.
//!
//! This is the only place that interprets status codes of index responses.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use super::range::read_resumable;
use super::RetryPolicy;
use crate::error::{IndexError, IndexResult};
use crate::types::IndexConfig;

/// Response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A GET request for an index, possibly resuming at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Target URL, without userinfo.
    pub url: Url,

    /// Basic-Auth credentials taken from the repository URL.
    pub basic_auth: Option<(String, Option<String>)>,

    /// First byte wanted; non-zero requests carry `Range: bytes=<offset>-`.
    pub offset: u64,
}

impl TransportRequest {
    /// Build a request from a repository URL, moving userinfo into Basic-Auth.
    pub fn from_url(url: &Url) -> Self {
        let mut clean = url.clone();
        let basic_auth = if !url.username().is_empty() || url.password().is_some() {
            let user = percent_decode_str(url.username())
                .decode_utf8_lossy()
                .into_owned();
            let pass = url
                .password()
                .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned());
            // Only fails for cannot-be-a-base URLs, which https URLs never are.
            let _ = clean.set_username("");
            let _ = clean.set_password(None);
            Some((user, pass))
        } else {
            None
        };

        Self {
            url: clean,
            basic_auth,
            offset: 0,
        }
    }

    /// The same request resumed at `offset`.
    pub fn resume_at(&self, offset: u64) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }
}

/// Response to a [`TransportRequest`].
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,

    /// Response body.
    pub body: ByteStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Client used for https index fetches.
///
/// Implementations report every status they receive; status interpretation
/// happens in [`fetch_remote`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &TransportRequest) -> IndexResult<TransportResponse>;
}

/// Default transport: reqwest with retries for transient failures.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl ReqwestTransport {
    pub fn new(config: &IndexConfig) -> IndexResult<Self> {
        let mut default_headers = HeaderMap::new();
        let user_agent =
            HeaderValue::from_str(&config.user_agent).map_err(|e| IndexError::Config {
                message: format!("invalid user agent {:?}: {}", config.user_agent, e),
            })?;
        default_headers.insert(USER_AGENT, user_agent);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| IndexError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self::from_client(client, config))
    }

    /// Wrap an existing reqwest client, keeping the retry policy from `config`.
    pub fn from_client(client: reqwest::Client, config: &IndexConfig) -> Self {
        Self {
            client,
            policy: RetryPolicy::from_config(config),
        }
    }

    async fn request_once(
        &self,
        request: &TransportRequest,
    ) -> IndexResult<reqwest::Response> {
        let mut builder = self.client.get(request.url.clone());

        if let Some((user, pass)) = &request.basic_auth {
            builder = builder.basic_auth(user, pass.as_ref());
        }

        if request.offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.offset));
        }

        Ok(builder.send().await?)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &TransportRequest) -> IndexResult<TransportResponse> {
        let mut retries = 0;
        let max_retries = self.policy.max_retries;

        loop {
            match self.request_once(request).await {
                Ok(response) if is_transient(response.status()) && retries < max_retries => {
                    retries += 1;

                    let status = response.status();
                    let backoff = if status == StatusCode::TOO_MANY_REQUESTS {
                        retry_after(response.headers())
                            .map(|after| self.policy.delay_for_retry_after(after))
                    } else {
                        None
                    }
                    .unwrap_or_else(|| self.policy.delay(retries));

                    warn!(
                        url = %request.url,
                        status = status.as_u16(),
                        retry = retries,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_retryable() && retries < max_retries => {
                    retries += 1;
                    let backoff = self.policy.delay(retries);

                    warn!(
                        url = %request.url,
                        error = %e,
                        retry = retries,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(io::Error::other))
                        .boxed();
                    return Ok(TransportResponse { status, body });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Fetch an https index, resuming the body with range requests on read errors.
pub(crate) async fn fetch_remote(
    transport: &dyn HttpTransport,
    url: &Url,
    arch: &str,
    policy: &RetryPolicy,
) -> IndexResult<Vec<u8>> {
    let request = TransportRequest::from_url(url);
    let shown = request.url.to_string();
    debug!(url = %shown, basic_auth = request.basic_auth.is_some(), "fetching repository index");

    let response = transport.get(&request).await.map_err(|e| match e {
        IndexError::Network { message } => IndexError::network(format!(
            "unable to get repository index at {}: {}",
            shown, message
        )),
        other => other,
    })?;

    match response.status {
        200 => {}
        404 => {
            return Err(IndexError::NotFound {
                arch: arch.to_string(),
                url: shown,
            })
        }
        status => {
            return Err(IndexError::Http {
                status,
                arch: arch.to_string(),
                url: shown,
            })
        }
    }

    read_resumable(transport, &request, response.body, arch, policy).await
}
