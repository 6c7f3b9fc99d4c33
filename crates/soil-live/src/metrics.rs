//! Prometheus metrics for the real-time core.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use soil_common::state::ConnectionState;
use std::sync::Arc;

/// Counters and gauges for the push connection and the poller.
#[derive(Clone)]
pub struct LiveMetrics {
    registry: Registry,

    /// Text frames read off the socket.
    pub frames_received: IntCounter,
    /// Frames not turned into events, by reason (`malformed`, `unrecognized`).
    pub frames_dropped: IntCounterVec,
    /// Events handed to the registry, by kind.
    pub events_dispatched: IntCounterVec,
    /// Listener invocations that errored or panicked.
    pub listener_failures: IntCounter,
    /// Socket open attempts, first connect included.
    pub connection_attempts: IntCounter,
    /// Current connection state (0=idle .. 4=failed).
    pub connection_state: IntGauge,
    /// Poll ticks, by mode (`narrow`, `full`).
    pub poll_ticks: IntCounterVec,
    /// Failed REST calls, by operation.
    pub rest_failures: IntCounterVec,
}

impl std::fmt::Debug for LiveMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMetrics")
            .field("frames_received", &self.frames_received.get())
            .field("connection_attempts", &self.connection_attempts.get())
            .finish_non_exhaustive()
    }
}

impl LiveMetrics {
    /// Create and register every metric on a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric descriptor is invalid or registered twice.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let frames_received = IntCounter::new(
            "soil_push_frames_received_total",
            "Text frames received on the push connection",
        )?;
        let frames_dropped = IntCounterVec::new(
            Opts::new(
                "soil_push_frames_dropped_total",
                "Push frames dropped without dispatch",
            ),
            &["reason"],
        )?;
        let events_dispatched = IntCounterVec::new(
            Opts::new(
                "soil_push_events_dispatched_total",
                "Events delivered to the subscription registry",
            ),
            &["kind"],
        )?;
        let listener_failures = IntCounter::new(
            "soil_listener_failures_total",
            "Listener invocations that returned an error or panicked",
        )?;
        let connection_attempts = IntCounter::new(
            "soil_push_connection_attempts_total",
            "Attempts to open the push connection",
        )?;
        let connection_state = IntGauge::new(
            "soil_push_connection_state",
            "Push connection state (0=idle, 1=connecting, 2=open, 3=reconnecting, 4=failed)",
        )?;
        let poll_ticks = IntCounterVec::new(
            Opts::new("soil_poll_ticks_total", "Poll ticks by mode"),
            &["mode"],
        )?;
        let rest_failures = IntCounterVec::new(
            Opts::new("soil_rest_failures_total", "Failed REST calls by operation"),
            &["operation"],
        )?;

        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(events_dispatched.clone()))?;
        registry.register(Box::new(listener_failures.clone()))?;
        registry.register(Box::new(connection_attempts.clone()))?;
        registry.register(Box::new(connection_state.clone()))?;
        registry.register(Box::new(poll_ticks.clone()))?;
        registry.register(Box::new(rest_failures.clone()))?;

        Ok(Self {
            registry,
            frames_received,
            frames_dropped,
            events_dispatched,
            listener_failures,
            connection_attempts,
            connection_state,
            poll_ticks,
            rest_failures,
        })
    }

    fn state_value(state: ConnectionState) -> i64 {
        match state {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }

    /// Publish a connection state change.
    pub fn record_state(&self, state: ConnectionState) {
        self.connection_state.set(Self::state_value(state));
    }

    /// Count a dropped frame.
    pub fn record_dropped(&self, reason: &str) {
        self.frames_dropped.with_label_values(&[reason]).inc();
    }

    /// Count a dispatched event and its failed listeners.
    pub fn record_dispatch(&self, kind: &str, failed: usize) {
        self.events_dispatched.with_label_values(&[kind]).inc();
        self.listener_failures.inc_by(failed as u64);
    }

    /// Count a poll tick.
    pub fn record_poll(&self, mode: &str) {
        self.poll_ticks.with_label_values(&[mode]).inc();
    }

    /// Count a failed REST call.
    pub fn record_rest_failure(&self, operation: &str) {
        self.rest_failures.with_label_values(&[operation]).inc();
    }

    /// Render metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

/// Metrics endpoint handler.
///
/// GET /metrics
pub async fn metrics_handler(Extension(metrics): Extension<Arc<LiveMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(output) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {e}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = LiveMetrics::new().unwrap();
        assert_eq!(metrics.frames_received.get(), 0);
        assert_eq!(metrics.connection_state.get(), 0);
    }

    #[test]
    fn test_record_state() {
        let metrics = LiveMetrics::new().unwrap();
        metrics.record_state(ConnectionState::Failed);
        assert_eq!(metrics.connection_state.get(), 4);
        metrics.record_state(ConnectionState::Open);
        assert_eq!(metrics.connection_state.get(), 2);
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = LiveMetrics::new().unwrap();
        metrics.record_dropped("malformed");
        metrics.record_dropped("malformed");
        metrics.record_dispatch("ALERT", 1);
        metrics.record_poll("full");

        assert_eq!(metrics.frames_dropped.with_label_values(&["malformed"]).get(), 2);
        assert_eq!(metrics.events_dispatched.with_label_values(&["ALERT"]).get(), 1);
        assert_eq!(metrics.listener_failures.get(), 1);
        assert_eq!(metrics.poll_ticks.with_label_values(&["full"]).get(), 1);
    }

    #[test]
    fn test_encode() {
        let metrics = LiveMetrics::new().unwrap();
        metrics.frames_received.inc();
        metrics.record_rest_failure("alerts_by_user");

        let output = metrics.encode().unwrap();
        assert!(output.contains("soil_push_frames_received_total 1"));
        assert!(output.contains("soil_rest_failures_total{operation=\"alerts_by_user\"} 1"));
    }
}
