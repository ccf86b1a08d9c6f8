//! Process configuration
//!
//! Configuration is built once at startup, from an optional YAML file named by
//! `KEYRELAY_CONFIG` with environment variables layered on top, and then handed
//! to the proxy. Request handling never reads the environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::proxy::credentials::parse_credential_list;
use crate::proxy::rewrite::{RewriteRule, default_rules};

/// Environment variable naming an optional YAML config file.
pub const CONFIG_PATH_VAR: &str = "KEYRELAY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {var}: {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("AUTH_TOKEN must be set to a non-empty value")]
    MissingAuthToken,

    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    /// Prefix rewrite table, evaluated in order. Empty means the built-in table.
    pub rewrites: Vec<RewriteRule>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7860".to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Origin every request is forwarded to, e.g. "https://openrouter.ai"
    pub base_url: String,
    /// Credentials injected as `Authorization: Bearer <key>`
    pub api_keys: Vec<String>,
    pub connect_timeout_ms: u64,
    /// Bound on waiting for response headers, and for a full buffered body
    pub request_timeout_ms: u64,
    /// Bound on the gap between two chunks of a streamed body
    pub idle_timeout_ms: u64,
    /// Honour HTTP_PROXY/HTTPS_PROXY style variables for outbound calls
    pub system_proxy: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai".to_string(),
            api_keys: Vec::new(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 60_000,
            idle_timeout_ms: 300_000,
            system_proxy: true,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_keys", &format_args!("<{} redacted>", self.api_keys.len()))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("system_proxy", &self.system_proxy)
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret callers present as `Authorization: Bearer <token>`
    pub token: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_some() { "<redacted>" } else { "<unset>" };
        f.debug_struct("AuthConfig").field("token", &token).finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// The file named by `KEYRELAY_CONFIG` (if any) is read first, then
    /// `LISTEN`, `UPSTREAM_URL`, `API_KEYS`, `AUTH_TOKEN`, `CONNECT_TIMEOUT_MS`,
    /// `REQUEST_TIMEOUT_MS` and `IDLE_TIMEOUT_MS` override it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup(CONFIG_PATH_VAR) {
            Some(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        cfg.apply_overrides(&lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&src)
    }

    pub fn from_yaml(src: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_yaml::from_str(src)?;
        cfg.upstream.api_keys.retain_mut(|key| {
            *key = key.trim().to_string();
            !key.is_empty()
        });
        Ok(cfg)
    }

    /// The rewrite table in effect.
    pub fn rewrite_rules(&self) -> Vec<RewriteRule> {
        if self.rewrites.is_empty() {
            default_rules()
        } else {
            self.rewrites.clone()
        }
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("LISTEN") {
            self.server.listen_addr = addr;
        }
        if let Some(url) = lookup("UPSTREAM_URL") {
            self.upstream.base_url = url;
        }
        if let Some(keys) = lookup("API_KEYS") {
            self.upstream.api_keys = parse_credential_list(&keys);
        }
        if let Some(token) = lookup("AUTH_TOKEN") {
            self.auth.token = Some(token);
        }

        override_millis(lookup, "CONNECT_TIMEOUT_MS", &mut self.upstream.connect_timeout_ms)?;
        override_millis(lookup, "REQUEST_TIMEOUT_MS", &mut self.upstream.request_timeout_ms)?;
        override_millis(lookup, "IDLE_TIMEOUT_MS", &mut self.upstream.idle_timeout_ms)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // No built-in fallback secret: refuse to start without one.
        match self.auth.token.as_deref() {
            Some(token) if !token.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingAuthToken),
        }

        let invalid = |reason: &str| ConfigError::InvalidUpstream {
            url: self.upstream.base_url.clone(),
            reason: reason.to_string(),
        };
        let url = url::Url::parse(&self.upstream.base_url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }

        Ok(())
    }
}

fn override_millis<F>(lookup: &F, var: &'static str, slot: &mut u64) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value })?;
    }
    Ok(())
}
