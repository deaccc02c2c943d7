//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer
//! and the backend responder. All types derive Serde traits for
//! deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Backend pool settings.
    pub pool: PoolConfig,

    /// What each session proposes in its HELLO.
    pub session: SessionConfig,

    /// Deadlines for blocking network calls.
    pub timeouts: TimeoutConfig,

    /// Optional TLS transport. Plain TCP when absent.
    pub tls: Option<TlsConfig>,

    /// Backend responder settings (`backend` mode).
    pub backend: BackendServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Startup parameters of the pool. Not mutated after construction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Backend addresses (`host:port`).
    pub servers: Vec<String>,

    /// Consecutive failed health checks before a backend is marked down.
    pub max_fail_attempts: u32,

    /// Interval of the health and status cycles, in seconds.
    pub check_interval_secs: u64,

    /// Interval of the reconnect cycle, in seconds.
    pub reconnect_interval_secs: u64,
}

impl PoolConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:4242".to_string()],
            max_fail_attempts: 3,
            check_interval_secs: 5,
            reconnect_interval_secs: 10,
        }
    }
}

/// HELLO parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Proposed health-check interval in seconds. The backend may confirm a
    /// different value in its ACK.
    pub check_interval_secs: u64,

    /// Metrics the balancer asks backends to report.
    pub supported_metrics: Vec<String>,

    /// Opaque token sent with HELLO. Not verified by anyone.
    pub auth_token: String,

    /// Protocol version sent with HELLO.
    pub protocol_version: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            supported_metrics: vec![
                "cpu_usage_percent".to_string(),
                "memory_usage_percent".to_string(),
            ],
            auth_token: "unverified".to_string(),
            protocol_version: 1.0,
        }
    }
}

/// Timeout configuration for network operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Dial (and TLS handshake) timeout in seconds.
    pub connect_secs: u64,

    /// Stream open, read and write timeout in seconds.
    pub io_secs: u64,

    /// How long a closing session waits for TERMINATE_ACK, in seconds.
    pub terminate_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn io(&self) -> Duration {
        Duration::from_secs(self.io_secs)
    }

    pub fn terminate(&self) -> Duration {
        Duration::from_secs(self.terminate_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            io_secs: 5,
            terminate_secs: 2,
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Certificate file (PEM). Trusted root on the balancer side, served
    /// certificate on the backend side.
    pub cert_file: String,

    /// Private key file (PEM). Backend side only.
    #[serde(default)]
    pub key_file: Option<String>,

    /// Name the balancer expects in the backend certificate.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

fn default_server_name() -> String {
    "localhost".to_string()
}

/// Backend responder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendServerConfig {
    /// Bind address (e.g., "0.0.0.0:4242").
    pub bind_address: String,

    /// Prefix of the identities handed out in ACKs.
    pub id_prefix: String,
}

impl Default for BackendServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4242".to_string(),
            id_prefix: "server".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: BalancerConfig = toml::from_str(
            r#"
            [pool]
            servers = ["10.0.0.1:4242", "10.0.0.2:4242"]
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.servers.len(), 2);
        assert_eq!(config.pool.max_fail_attempts, 3);
        assert_eq!(config.session.check_interval_secs, 5);
        assert!(config.tls.is_none());
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn full_file_parses() {
        let config: BalancerConfig = toml::from_str(
            r#"
            [pool]
            servers = ["127.0.0.1:4242"]
            max_fail_attempts = 5
            check_interval_secs = 2
            reconnect_interval_secs = 4

            [session]
            check_interval_secs = 1
            supported_metrics = ["cpu_usage_percent"]
            auth_token = "abc"
            protocol_version = 1.0

            [timeouts]
            connect_secs = 1
            io_secs = 2
            terminate_secs = 3

            [tls]
            cert_file = "certs/server.pem"

            [backend]
            bind_address = "0.0.0.0:5000"
            id_prefix = "edge"

            [observability]
            log_level = "debug"
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.reconnect_interval(), Duration::from_secs(4));
        assert_eq!(config.timeouts.terminate(), Duration::from_secs(3));
        let tls = config.tls.unwrap();
        assert_eq!(tls.server_name, "localhost");
        assert!(tls.key_file.is_none());
        assert_eq!(config.backend.id_prefix, "edge");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
