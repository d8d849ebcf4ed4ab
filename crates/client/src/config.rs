//! Client configuration: endpoint defaults, discovery candidates, timeouts,
//! and the reconnect policy.

use std::time::Duration;

/// Default game server endpoint when nothing is configured.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080";
/// Default server port, used when only a port override is configured.
pub const DEFAULT_SERVER_PORT: u16 = 8080;
/// Ordered candidate path suffixes probed during endpoint discovery.
///
/// The root path comes first so a directly-exposed server wins over a
/// reverse-proxy mount.
pub const DEFAULT_CANDIDATE_PATHS: &[&str] = &["", "/ws"];

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Reconnect behavior after an unexpected close.
///
/// Disabled by default: UI consumers own the retry decision unless they
/// opt in to automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Disabled,
    Backoff(BackoffPolicy),
}

/// Exponential backoff parameters for automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

/// Configuration for a [`crate::GameClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base websocket URL of the game server.
    pub server_url: String,
    /// Path suffix used when `connect` is not given one explicitly.
    /// `None` means discover a path by probing `candidate_paths`.
    pub default_path: Option<String>,
    /// Ordered candidate path suffixes for endpoint discovery.
    pub candidate_paths: Vec<String>,
    /// Handshake timeout for a full connection attempt.
    pub connect_timeout: Duration,
    /// Per-candidate timeout during discovery probing.
    pub probe_timeout: Duration,
    /// Reconnect behavior after an unexpected close.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            default_path: None,
            candidate_paths: DEFAULT_CANDIDATE_PATHS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            reconnect: ReconnectPolicy::Disabled,
        }
    }
}

impl ClientConfig {
    /// Build a config from the environment.
    ///
    /// `GRIDFALL_SERVER_WS_URL` overrides the full base URL; otherwise
    /// `GRIDFALL_SERVER_PORT` adjusts the default localhost endpoint.
    /// `GRIDFALL_WS_PATH` pins the path suffix and skips discovery.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(server_url) = std::env::var("GRIDFALL_SERVER_WS_URL") {
            config.server_url = server_url;
        } else if let Some(port) = std::env::var("GRIDFALL_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
        {
            config.server_url = format!("ws://localhost:{port}");
        }
        if let Ok(path) = std::env::var("GRIDFALL_WS_PATH") {
            config.default_path = Some(path);
        }
        config
    }

    #[must_use]
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    /// Pin the path suffix, skipping endpoint discovery on `connect`.
    #[must_use]
    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_candidate_paths(mut self, paths: Vec<String>) -> Self {
        self.candidate_paths = paths;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Join a base URL and a path suffix without doubling slashes.
///
/// The base is returned untouched for an empty suffix so `get_url()` reports
/// exactly what the caller passed in.
pub(crate) fn join_endpoint(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
