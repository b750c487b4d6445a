//! # Application State
//!
//! Everything the HTTP handlers and WebSocket actors share. Actix clones the
//! state into every worker, so each field is an `Arc` and cloning is cheap.
//!
//! ## Ownership:
//! - **config**: immutable after startup
//! - **metrics**: HTTP request counters, written by the telemetry middleware
//! - **engine**: the relay engine with its rooms, limiter, cache and providers
//! - **hub**: open WebSocket connections, also the engine's event sink

use crate::config::AppConfig;
use crate::gateway::ConnectionHub;
use crate::relay::{AudioLimits, RelayEngine, RelayServices};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
    pub engine: Arc<RelayEngine>,
    pub hub: Arc<ConnectionHub>,
}

/// HTTP and connection counters collected since startup.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Currently open WebSocket connections
    pub active_connections: u32,
    /// Connections accepted since startup
    pub total_connections: u64,
    /// Keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire the relay services to a fresh connection hub.
    pub fn new(config: AppConfig) -> Self {
        let services = RelayServices::from_config(&config);
        Self::with_services(config, services)
    }

    /// Same as [`AppState::new`] with caller-supplied services.
    pub fn with_services(config: AppConfig, services: RelayServices) -> Self {
        let hub = Arc::new(ConnectionHub::default());
        let limits = AudioLimits::from_config(&config);
        let engine = Arc::new(RelayEngine::new(services, hub.clone(), limits));

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            engine,
            hub,
        }
    }

    fn with_metrics<R>(&self, update: impl FnOnce(&mut AppMetrics) -> R) -> R {
        let mut metrics = self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut metrics)
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|metrics| {
            metrics.request_count += 1;
            if is_error {
                metrics.error_count += 1;
            }

            let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    pub fn connection_opened(&self) {
        self.with_metrics(|metrics| {
            metrics.active_connections += 1;
            metrics.total_connections += 1;
        });
    }

    pub fn connection_closed(&self) {
        self.with_metrics(|metrics| {
            metrics.active_connections = metrics.active_connections.saturating_sub(1);
        });
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 4, false);
        state.record_endpoint_request("GET /health", 6, true);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);

        let health = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(health.average_duration_ms(), 5.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_connection_counters_never_underflow() {
        let state = AppState::new(AppConfig::default());
        state.connection_opened();
        state.connection_closed();
        state.connection_closed();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.total_connections, 1);
    }

    #[test]
    fn test_default_state_runs_offline() {
        let state = AppState::new(AppConfig::default());
        assert!(state.engine.health().offline_mode);
    }
}
