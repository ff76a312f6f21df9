//! Per-connection settings.

use std::time::Duration;

use tracing::warn;

use crate::rpc::framing::DEFAULT_MAX_CONTENT_LENGTH;
use crate::rpc::ErrorCode;

/// Environment variable overriding [`ConnectionConfig::request_timeout`], in seconds.
pub const ENV_REQUEST_TIMEOUT: &str = "CRYSTALMATH_LSP_REQUEST_TIMEOUT_SECS";
/// Environment variable overriding [`ConnectionConfig::lifecycle_violation_code`].
pub const ENV_LIFECYCLE_CODE: &str = "CRYSTALMATH_LSP_LIFECYCLE_CODE";
/// Environment variable overriding [`ConnectionConfig::max_content_length`], in bytes.
pub const ENV_MAX_CONTENT_LENGTH: &str = "CRYSTALMATH_LSP_MAX_CONTENT_LENGTH";

/// Default time allowed for in-flight handlers once the peer closes its side.
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;

/// Settings for one [`crate::server::Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Tag included in log events.
    pub name: String,
    /// Largest accepted `Content-Length`.
    pub max_content_length: usize,
    /// Bound applied by [`crate::server::Peer::call`]. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Frames buffered between the reader and the dispatcher.
    pub inbound_queue_depth: usize,
    /// Error code for requests arriving outside their lifecycle window.
    pub lifecycle_violation_code: i64,
    /// How long in-flight handlers may run after the peer closes the stream.
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "crystalmath-lsp".to_string(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            request_timeout: None,
            inbound_queue_depth: 64,
            lifecycle_violation_code: ErrorCode::InvalidRequest.code(),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl ConnectionConfig {
    /// Defaults overridden by `CRYSTALMATH_LSP_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_REQUEST_TIMEOUT) {
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(code) = parse_var::<i64>(&lookup, ENV_LIFECYCLE_CODE) {
            config.lifecycle_violation_code = code;
        }
        if let Some(max) = parse_var::<usize>(&lookup, ENV_MAX_CONTENT_LENGTH) {
            config.max_content_length = max;
        }

        config
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }

    pub fn with_lifecycle_violation_code(mut self, code: i64) -> Self {
        self.lifecycle_violation_code = code;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_inbound_queue_depth(mut self, depth: usize) -> Self {
        self.inbound_queue_depth = depth.max(1);
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
