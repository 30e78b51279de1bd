//! Broker connection settings.

use std::time::Duration;

use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};

/// Vhost used when none is configured.
const DEFAULT_VHOST: &str = "/";

/// Where and how to reach the AMQP broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Virtual host name. Empty means the default vhost `/`.
    pub vhost: String,
    /// Total connection attempts before giving up.
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub connect_backoff: Duration,
}

impl BrokerConfig {
    /// Connection target as structured fields.
    ///
    /// Credentials and vhost are passed verbatim, so characters such as
    /// `@`, `/` or `:` need no escaping.
    #[must_use]
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost_name().to_string(),
            ..AMQPUri::default()
        }
    }

    fn vhost_name(&self) -> &str {
        if self.vhost.is_empty() {
            DEFAULT_VHOST
        } else {
            &self.vhost
        }
    }

    /// Human-readable target for logs. Never includes the password.
    #[must_use]
    pub fn redacted_uri(&self) -> String {
        format!(
            "amqp://{}:***@{}:{} vhost={:?}",
            self.user,
            self.host,
            self.port,
            self.vhost_name()
        )
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: String::new(),
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(500),
        }
    }
}
