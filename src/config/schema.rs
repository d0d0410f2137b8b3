//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::load_balancer::Algorithm;
use crate::security::auth::DEFAULT_AUTH_HEADER;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend server URLs, in rotation order.
    pub backend_servers: Vec<String>,

    /// Tokens accepted in the auth header.
    pub valid_tokens: Vec<String>,

    /// Backend selection algorithm.
    pub load_balancing_algorithm: Algorithm,

    /// Active health checks. Absent disables the checker.
    pub health_check: Option<HealthCheckConfig>,

    /// Authentication header settings.
    pub auth: AuthConfig,

    /// WebSocket tunnel settings.
    pub websocket: WebSocketConfig,

    /// Failover settings for HTTP forwarding.
    pub retries: RetryConfig,

    /// Drain behaviour on shutdown.
    pub shutdown: ShutdownConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path to probe on every backend.
    pub path: String,

    /// HTTP method used for the probe.
    pub method: String,

    /// Status code a healthy backend answers with.
    #[serde(alias = "resp_code")]
    pub expected_status: u16,

    /// Health check interval in seconds.
    #[serde(alias = "interval")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    #[serde(alias = "timeout")]
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            method: "GET".to_string(),
            expected_status: 200,
            interval_secs: 10,
            timeout_secs: 5,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Request header carrying the token.
    pub header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_AUTH_HEADER.to_string(),
        }
    }
}

/// WebSocket tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Timeout for dialing the backend side of a tunnel, in seconds.
    pub dial_timeout_secs: u64,
}

impl WebSocketConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self { dial_timeout_secs: 10 }
    }
}

/// Failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts against a newly selected backend after a transport
    /// error. Zero disables failover.
    pub failover_attempts: u32,

    /// Largest request body buffered so it can be replayed on failover.
    pub max_buffered_body_bytes: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            failover_attempts: 0,
            max_buffered_body_bytes: 1024 * 1024,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long open tunnels may take to close before a forced exit.
    pub drain_timeout_secs: u64,

    /// How often the tunnel registry is polled while draining.
    pub poll_interval_ms: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 4,
            poll_interval_ms: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Interval of the traffic report, in seconds.
    pub report_interval_secs: u64,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl ObservabilityConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            report_interval_secs: 1,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
