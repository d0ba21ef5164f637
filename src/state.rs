//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler and WebSocket actor:
//! the runtime configuration, the ingest metrics, and the server start time.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: multiple handlers hold a reference to the same state
//! - **RwLock**: many concurrent readers OR one writer at a time
//! - The configuration is read on every connection and only written by the
//!   config update endpoint; metrics are written constantly and read only by
//!   the health endpoints, so both fit the reader-writer split well.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Ingest and HTTP metrics (updated by middleware and WebSocket actors)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, safe to share directly)
    pub start_time: Instant,
}

/// Metrics collected across all connections and requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors (HTTP and per-message rejections) since start
    pub error_count: u64,

    /// Current number of live WebSocket ingest sessions
    pub active_sessions: u32,

    /// Audio chunks accepted into accumulators since start
    pub chunks_received: u64,

    /// Decoded audio bytes accepted since start
    pub audio_bytes_received: u64,

    /// Flushes committed (both artifacts written) since start
    pub flushes_completed: u64,

    /// Audio bytes committed to artifacts since start
    pub audio_bytes_flushed: u64,

    /// Flush attempts that failed after their retry
    pub flush_failures: u64,

    /// Detailed metrics for each HTTP endpoint
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads are not
    /// blocked while the caller works with the snapshot.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter.
    ///
    /// ## When this is called:
    /// - HTTP 4xx/5xx responses (via the metrics middleware)
    /// - WebSocket per-message rejections (decode and validation errors)
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Increment the active sessions gauge (WebSocket session started).
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// Decrement the active sessions gauge (WebSocket session ended).
    ///
    /// Guards against underflow so teardown races cannot wrap the gauge.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Record one accepted audio chunk.
    pub fn record_chunk(&self, byte_len: usize) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.chunks_received += 1;
        metrics.audio_bytes_received += byte_len as u64;
    }

    /// Record one committed flush.
    pub fn record_flush(&self, byte_len: usize) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.flushes_completed += 1;
        metrics.audio_bytes_flushed += byte_len as u64;
    }

    /// Record one flush that failed after its retry.
    pub fn record_flush_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.flush_failures += 1;
        metrics.error_count += 1;
    }

    /// Get a snapshot of current metrics (used for the health endpoints).
    ///
    /// Takes one read lock and clones, so metrics cannot shift mid-response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            chunks_received: metrics.chunks_received,
            audio_bytes_received: metrics.audio_bytes_received,
            flushes_completed: metrics.flushes_completed,
            audio_bytes_flushed: metrics.audio_bytes_flushed,
            flush_failures: metrics.flush_failures,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Calculate the error rate for this endpoint (0.0 to 1.0).
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
    fn test_ingest_counters() {
        let state = AppState::new(AppConfig::default());

        state.record_chunk(640);
        state.record_chunk(640);
        state.record_flush(1280);
        state.record_flush_failure();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.chunks_received, 2);
        assert_eq!(snapshot.audio_bytes_received, 1280);
        assert_eq!(snapshot.flushes_completed, 1);
        assert_eq!(snapshot.audio_bytes_flushed, 1280);
        assert_eq!(snapshot.flush_failures, 1);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_active_sessions_gauge_never_underflows() {
        let state = AppState::new(AppConfig::default());

        state.increment_active_sessions();
        state.decrement_active_sessions();
        state.decrement_active_sessions();

        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let state = AppState::new(AppConfig::default());

        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        // The stored config is untouched
        assert_eq!(state.get_config().server.port, 8765);
    }
}
