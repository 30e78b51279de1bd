//! HTTP configuration types for the `SiteLens` server.

use std::time::Duration;

/// Top-level HTTP configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete. Does not apply to
    /// the event stream.
    pub request_timeout: Duration,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive: Duration,
    /// How long graceful shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            sse_keep_alive: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(10),
        }
    }
}
