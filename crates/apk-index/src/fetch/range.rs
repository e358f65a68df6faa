//! Resumable body reads.
//!
//! When a body read fails mid-stream the request is reissued with
//! `Range: bytes=<read so far>-` and reading continues. Callers see a single
//! read that either returns the whole body or fails.

use futures::StreamExt;
use tracing::{debug, warn};

use super::http::{ByteStream, HttpTransport, TransportRequest};
use super::RetryPolicy;
use crate::error::{IndexError, IndexResult};

pub(crate) async fn read_resumable(
    transport: &dyn HttpTransport,
    request: &TransportRequest,
    mut body: ByteStream,
    arch: &str,
    policy: &RetryPolicy,
) -> IndexResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut resumes = 0;

    loop {
        let err = match body.next().await {
            Some(Ok(chunk)) => {
                buf.extend_from_slice(&chunk);
                continue;
            }
            None => return Ok(buf),
            Some(Err(e)) => e,
        };

        if resumes >= policy.max_retries {
            return Err(IndexError::network(format!(
                "unable to read repository index at {}: {}",
                request.url, err
            )));
        }
        resumes += 1;

        let backoff = policy.delay(resumes);
        warn!(
            url = %request.url,
            error = %err,
            offset = buf.len(),
            retry = resumes,
            max_retries = policy.max_retries,
            backoff_ms = backoff.as_millis(),
            "body read failed, resuming with range request"
        );
        tokio::time::sleep(backoff).await;

        let resumed = transport
            .get(&request.resume_at(buf.len() as u64))
            .await
            .map_err(|e| match e {
                IndexError::Network { message } => IndexError::network(format!(
                    "unable to resume repository index at {}: {}",
                    request.url, message
                )),
                other => other,
            })?;
        match resumed.status {
            206 => {}
            200 => {
                debug!(url = %request.url, "server ignored range request, restarting body");
                buf.clear();
            }
            status => {
                return Err(IndexError::Http {
                    status,
                    arch: arch.to_string(),
                    url: request.url.to_string(),
                })
            }
        }
        body = resumed.body;
    }
}
