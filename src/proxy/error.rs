//! Forwarding failures and how callers see them.

use std::time::Duration;

use thiserror::Error;

use crate::http::response::{Response, StatusCode};

/// Failure of a single forwarding operation. Never retried.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The request target cannot be carried to the upstream unchanged.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    /// Connecting to the upstream failed.
    #[error("failed to connect to upstream: {0}")]
    Connect(String),

    /// The upstream did not answer (or stalled) within the allowed time.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// The request was sent but the exchange failed or the response was malformed.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Reading the response body failed.
    #[error("failed to read upstream body: {0}")]
    Body(String),
}

impl ForwardError {
    /// Classify a client error, preferring timeout and connect causes.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ForwardError::Timeout(timeout)
        } else if err.is_connect() {
            ForwardError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            ForwardError::Body(err.to_string())
        } else {
            ForwardError::Upstream(err.to_string())
        }
    }

    /// 400 for targets the caller must fix, 504 for timeouts, 502 for
    /// everything else.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Caller-facing response; upstream details stay in the logs.
    pub fn to_response(&self) -> Response {
        let status = self.status();
        Response::error(status, status.reason_phrase())
    }
}
