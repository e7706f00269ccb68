//! The fetch executor seam and its HTTP implementation
//!
//! A `FetchExecutor` performs the actual network I/O for one assignment and
//! reports either a `FetchResponse` or a classified `TransportError`. The
//! scheduler's outcome classifier consumes exactly this shape; redirects are
//! returned as 3xx responses, never followed here.

use crate::config::Config;
use crate::request::{FetchResponse, HttpVersion};
use crate::request::{ErrorReason, FailureReason};
use crate::scheduler::FetchAssignment;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Version};
use std::time::Duration;
use thiserror::Error;

/// Transport-layer failure taxonomy
///
/// Most variants are transient and map onto an `ErrorReason`; connection
/// refusal and unknown hosts are terminal and map onto a `FailureReason`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection timed out")]
    ConnectionTimedOut,
    #[error("socket timeout during transfer")]
    SocketTimeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("unknown host")]
    UnknownHost,
    #[error("no route to host")]
    NoRouteToHost,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("connection reset by peer")]
    ResetByPeer,
    #[error("malformed status line")]
    BadStatusLine,
    #[error("malformed header line")]
    BadHeaderLine,
    #[error("unexpected EOF during read")]
    EofDuringRead,
    #[error("bad content length")]
    BadContentLength,
    #[error("unparseable chunk length")]
    ChunkLengthParse,
    #[error("EOF inside chunked body")]
    ChunkEof,
    #[error("decompression failure")]
    DecompressionFailure,
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Terminal classification, when this error kind never deserves a retry
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            TransportError::ConnectionRefused => Some(FailureReason::ConnectionRefused),
            TransportError::UnknownHost => Some(FailureReason::UnknownHost),
            _ => None,
        }
    }

    /// Transient classification for the retry pipeline
    pub fn error_reason(&self) -> ErrorReason {
        match self {
            TransportError::ConnectionTimedOut => ErrorReason::ConnectionTimedOut,
            TransportError::SocketTimeout => ErrorReason::SocketTimeout,
            TransportError::NoRouteToHost => ErrorReason::NoRouteToHost,
            TransportError::NetworkUnreachable => ErrorReason::NetworkUnreachable,
            TransportError::ResetByPeer => ErrorReason::ResetByPeer,
            TransportError::BadStatusLine => ErrorReason::BadStatusLine,
            TransportError::BadHeaderLine => ErrorReason::BadHeaderLine,
            TransportError::EofDuringRead => ErrorReason::EofDuringRead,
            TransportError::BadContentLength => ErrorReason::BadContentLength,
            TransportError::ChunkLengthParse => ErrorReason::ChunkLengthParse,
            TransportError::ChunkEof => ErrorReason::ChunkEof,
            TransportError::DecompressionFailure => ErrorReason::DecompressionFailure,
            TransportError::ConnectionRefused | TransportError::UnknownHost => {
                ErrorReason::Unknown
            }
            TransportError::Other(_) => ErrorReason::Unknown,
        }
    }
}

/// Performs the network I/O for one fetch assignment
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn fetch(
        &self,
        assignment: &FetchAssignment,
    ) -> std::result::Result<FetchResponse, TransportError>;
}

/// HTTP(S) executor backed by reqwest
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Builds the executor with the crawler's user agent and timeouts
    ///
    /// Redirects are never followed here — the scheduler owns redirect
    /// handling, so 3xx responses are returned as-is.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent_string())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::none())
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchExecutor for HttpExecutor {
    async fn fetch(
        &self,
        assignment: &FetchAssignment,
    ) -> std::result::Result<FetchResponse, TransportError> {
        let scheme = assignment.url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(TransportError::Other(format!(
                "unsupported scheme: {}",
                scheme
            )));
        }

        let mut request = self.client.get(assignment.url.clone());
        if assignment.http_version == HttpVersion::Http10 {
            request = request.version(Version::HTTP_10);
        }

        let response = request.send().await.map_err(classify_send_error)?;

        let status = response.status().as_u16();
        let resolved_addr = response.remote_addr().map(|a| a.ip());
        let http_version = match response.version() {
            Version::HTTP_10 | Version::HTTP_09 => HttpVersion::Http10,
            _ => HttpVersion::Http11,
        };
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(classify_body_error)?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
            resolved_addr,
            http_version,
        })
    }
}

/// Maps a reqwest send-phase error onto the transport taxonomy
fn classify_send_error(error: reqwest::Error) -> TransportError {
    let description = error.to_string();
    if error.is_timeout() {
        if error.is_connect() {
            return TransportError::ConnectionTimedOut;
        }
        return TransportError::SocketTimeout;
    }
    if error.is_connect() {
        let lowered = description.to_lowercase();
        if lowered.contains("dns") || lowered.contains("resolve") {
            return TransportError::UnknownHost;
        }
        if lowered.contains("refused") {
            return TransportError::ConnectionRefused;
        }
        if lowered.contains("unreachable") {
            return TransportError::NetworkUnreachable;
        }
        return TransportError::ConnectionRefused;
    }
    if error.is_decode() {
        return TransportError::DecompressionFailure;
    }
    TransportError::Other(description)
}

/// Maps an error while reading the body onto the transport taxonomy
fn classify_body_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::SocketTimeout;
    }
    if error.is_decode() {
        return TransportError::DecompressionFailure;
    }
    let lowered = error.to_string().to_lowercase();
    if lowered.contains("reset") {
        return TransportError::ResetByPeer;
    }
    TransportError::EofDuringRead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_transport_errors() {
        assert_eq!(
            TransportError::ConnectionRefused.failure_reason(),
            Some(FailureReason::ConnectionRefused)
        );
        assert_eq!(
            TransportError::UnknownHost.failure_reason(),
            Some(FailureReason::UnknownHost)
        );
        assert!(TransportError::SocketTimeout.failure_reason().is_none());
        assert!(TransportError::ResetByPeer.failure_reason().is_none());
    }

    #[test]
    fn test_transient_transport_errors_map_to_error_reasons() {
        assert_eq!(
            TransportError::SocketTimeout.error_reason(),
            ErrorReason::SocketTimeout
        );
        assert_eq!(
            TransportError::ChunkEof.error_reason(),
            ErrorReason::ChunkEof
        );
        assert_eq!(
            TransportError::Other("weird".to_string()).error_reason(),
            ErrorReason::Unknown
        );
    }

    #[test]
    fn test_build_executor() {
        let config = crate::config::test_config();
        assert!(HttpExecutor::new(&config).is_ok());
    }
}
