//! Prometheus-based transport metrics
//!
//! Counters are updated by acceptors, connectors and connections whether or
//! not they are registered; `init_metrics` makes them visible through
//! [`REGISTRY`].

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Connections produced by acceptors
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: IntCounter = IntCounter::new(
        "strandline_connections_accepted_total",
        "Total number of inbound connections accepted"
    ).unwrap();

    /// Connections produced by connectors
    pub static ref CONNECTIONS_DIALED_TOTAL: IntCounter = IntCounter::new(
        "strandline_connections_dialed_total",
        "Total number of outbound connections established"
    ).unwrap();

    /// Dials that produced no connection
    pub static ref DIAL_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "strandline_dial_failures_total",
        "Total number of failed outbound dials"
    ).unwrap();

    /// Connections not yet closed
    pub static ref CONNECTIONS_ACTIVE: IntGauge = IntGauge::new(
        "strandline_connections_active",
        "Number of connections not yet closed"
    ).unwrap();

    pub static ref BYTES_READ_TOTAL: IntCounter = IntCounter::new(
        "strandline_bytes_read_total",
        "Total bytes read from connections"
    ).unwrap();

    pub static ref BYTES_WRITTEN_TOTAL: IntCounter = IntCounter::new(
        "strandline_bytes_written_total",
        "Total bytes written to connections"
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(CONNECTIONS_ACCEPTED_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(CONNECTIONS_DIALED_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(DIAL_FAILURES_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(CONNECTIONS_ACTIVE.clone())).ok();
    REGISTRY.register(Box::new(BYTES_READ_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(BYTES_WRITTEN_TOTAL.clone())).ok();
}

/// Render the registry in the Prometheus text format
pub fn gather_text() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Keeps a gauge raised while alive; [`CONNECTIONS_ACTIVE`] by default
pub(crate) struct ActiveConnection(IntGauge);

impl ActiveConnection {
    pub(crate) fn open() -> Self {
        Self::tracked_by(&CONNECTIONS_ACTIVE)
    }

    fn tracked_by(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        let text = gather_text();
        assert!(text.contains("strandline_connections_accepted_total"));
        assert!(text.contains("strandline_bytes_written_total"));
    }

    #[test]
    fn test_active_guard_balances() {
        // private gauge; the global one moves with every live connection
        let gauge = IntGauge::new("test_connections_active", "guard test").unwrap();

        let first = ActiveConnection::tracked_by(&gauge);
        assert_eq!(gauge.get(), 1);
        let second = ActiveConnection::tracked_by(&gauge);
        assert_eq!(gauge.get(), 2);

        drop(first);
        assert_eq!(gauge.get(), 1);
        drop(second);
        assert_eq!(gauge.get(), 0);
    }
}
