//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::pool::BackendPool;
use crate::observability::metrics;

/// Validated probe parameters.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub method: Method,
    pub path: String,
    pub expected_status: StatusCode,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeConfigError {
    #[error("invalid health check method `{0}`")]
    Method(String),

    #[error("invalid health check status {0}")]
    Status(u16),

    #[error("health check `{0}` must be greater than zero")]
    Zero(&'static str),
}

impl TryFrom<&HealthCheckConfig> for ProbeSettings {
    type Error = ProbeConfigError;

    fn try_from(config: &HealthCheckConfig) -> Result<Self, Self::Error> {
        let method = Method::from_bytes(config.method.as_bytes())
            .map_err(|_| ProbeConfigError::Method(config.method.clone()))?;
        let expected_status = StatusCode::from_u16(config.expected_status)
            .map_err(|_| ProbeConfigError::Status(config.expected_status))?;
        if config.interval_secs == 0 {
            return Err(ProbeConfigError::Zero("interval_secs"));
        }
        if config.timeout_secs == 0 {
            return Err(ProbeConfigError::Zero("timeout_secs"));
        }

        Ok(Self {
            method,
            path: config.path.clone(),
            expected_status,
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

/// Why a probe judged a backend unhealthy.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to build probe request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("connection error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("status {actual}, expected {expected}")]
    Status { expected: StatusCode, actual: StatusCode },
}

pub struct HealthMonitor {
    pool: Arc<BackendPool>,
    settings: ProbeSettings,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<BackendPool>, settings: ProbeSettings) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .build(HttpConnector::new());

        Self {
            pool,
            settings,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.settings.interval,
            timeout = ?self.settings.timeout,
            method = %self.settings.method,
            path = %self.settings.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once and record the results.
    pub async fn check_all(&self) {
        let backends = self.pool.all_backends();
        let results = join_all(backends.iter().map(|b| self.probe(b))).await;

        for (backend, result) in backends.iter().zip(results) {
            let healthy = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(backend = %backend, error = %e, "Health check failed");
                    false
                }
            };

            self.pool.set_healthy(backend, healthy);
            metrics::record_backend_health(backend.address().as_str(), healthy);
        }

        tracing::debug!(
            healthy = self.pool.healthy_count(),
            total = self.pool.len(),
            "Health check round complete"
        );
    }

    /// Issue one probe. `Ok` iff the expected status arrives within the timeout.
    pub async fn probe(&self, backend: &Backend) -> Result<(), ProbeError> {
        let request = Request::builder()
            .method(self.settings.method.clone())
            .uri(backend.probe_uri(&self.settings.path)?)
            .header("user-agent", "lb-proxy-health-check")
            .body(Body::empty())?;

        let response = time::timeout(self.settings.timeout, self.client.request(request))
            .await
            .map_err(|_| ProbeError::Timeout(self.settings.timeout))??;

        let actual = response.status();
        if actual == self.settings.expected_status {
            Ok(())
        } else {
            Err(ProbeError::Status {
                expected: self.settings.expected_status,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_config() {
        let config = HealthCheckConfig {
            method: "HEAD".into(),
            expected_status: 204,
            interval_secs: 3,
            timeout_secs: 1,
            ..Default::default()
        };
        let settings = ProbeSettings::try_from(&config).unwrap();
        assert_eq!(settings.method, Method::HEAD);
        assert_eq!(settings.expected_status, StatusCode::NO_CONTENT);
        assert_eq!(settings.interval, Duration::from_secs(3));
        assert_eq!(settings.timeout, Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_settings() {
        let config = HealthCheckConfig {
            expected_status: 7,
            ..Default::default()
        };
        assert_eq!(ProbeSettings::try_from(&config).unwrap_err(), ProbeConfigError::Status(7));

        let config = HealthCheckConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(
            ProbeSettings::try_from(&config).unwrap_err(),
            ProbeConfigError::Zero("interval_secs")
        );

        let config = HealthCheckConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(
            ProbeSettings::try_from(&config).unwrap_err(),
            ProbeConfigError::Zero("timeout_secs")
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_unhealthy() {
        let pool = Arc::new(BackendPool::new(&["http://127.0.0.1:1"], Default::default()).unwrap());
        let settings = ProbeSettings {
            method: Method::GET,
            path: "/health".into(),
            expected_status: StatusCode::OK,
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(500),
        };
        let monitor = HealthMonitor::new(pool.clone(), settings);

        monitor.check_all().await;
        assert_eq!(pool.healthy_count(), 0);
    }
}
