//! The per-request operation: route, guard, forward, relay.

use std::time::Instant;

use crate::config::Config;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::proxy::auth::AuthGuard;
use crate::proxy::credentials::CredentialPool;
use crate::proxy::error::ForwardError;
use crate::proxy::relay::relay;
use crate::proxy::rewrite::PathRewriter;
use crate::proxy::upstream::Forwarder;

/// Methods the proxy accepts on forwarded paths.
pub const ALLOWED_METHODS: &[Method] = &[Method::GET, Method::POST];

/// Body of the liveness route.
pub const LIVENESS_BODY: &str = "Service is running.";

/// Shared, read-only state behind every connection.
#[derive(Debug)]
pub struct ProxyHandler {
    forwarder: Forwarder,
    auth: AuthGuard,
}

impl ProxyHandler {
    pub fn new(forwarder: Forwarder, auth: AuthGuard) -> Self {
        Self { forwarder, auth }
    }

    /// Wire the handler from validated configuration.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let token = cfg
            .auth
            .token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("auth token missing from validated config"))?;

        let credentials = CredentialPool::new(&cfg.upstream.api_keys);
        if credentials.is_empty() {
            tracing::warn!("No upstream credentials configured; requests are forwarded without injection");
        } else {
            tracing::info!(credentials = credentials.len(), "Credential pool loaded");
        }

        let forwarder = Forwarder::new(&cfg.upstream, PathRewriter::new(cfg.rewrite_rules()), credentials)?;
        Ok(Self::new(forwarder, AuthGuard::new(token)))
    }

    /// Handle one request. Always yields a response; failures are mapped to
    /// status codes here and never escape.
    pub async fn handle(&self, request: Request) -> Response {
        if request.route() == "/" {
            return match request.method {
                Method::GET => Response::text(StatusCode::OK, LIVENESS_BODY),
                _ => Response::method_not_allowed("GET"),
            };
        }

        if !ALLOWED_METHODS.contains(&request.method) {
            return Response::method_not_allowed(&allow_header());
        }

        if !request.route().starts_with('/') {
            return Response::bad_request();
        }

        if !self.auth.permits(&request) {
            tracing::warn!(method = %request.method, path = %request.route(), "Rejected unauthenticated request");
            return Response::unauthorized();
        }

        let started = Instant::now();
        match self.forwarder.forward(&request).await {
            Ok(upstream) => {
                tracing::info!(
                    method = %request.method,
                    path = %request.route(),
                    status = upstream.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request forwarded"
                );
                relay(upstream)
            }
            Err(e @ ForwardError::InvalidUrl(_)) => {
                tracing::warn!(method = %request.method, error = %e, "Rejected unforwardable target");
                e.to_response()
            }
            Err(e) => {
                tracing::error!(
                    method = %request.method,
                    path = %request.route(),
                    error = %e,
                    "Forwarding failed"
                );
                e.to_response()
            }
        }
    }
}

fn allow_header() -> String {
    ALLOWED_METHODS
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
