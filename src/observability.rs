use std::net::SocketAddr;

use crate::model::State;

// ── Request-driven metrics ──────────────────────────────────────

/// Counter: records entering `handle`. Labels: action.
pub const HANDLE_TOTAL: &str = "preempt_handle_total";

/// Counter: requests granted a slot.
pub const REQUESTS_GRANTED_TOTAL: &str = "preempt_requests_granted_total";

/// Counter: requests rejected for lack of a feasible slot.
pub const REQUESTS_REJECTED_TOTAL: &str = "preempt_requests_rejected_total";

/// Counter: finalizations. Labels: state.
pub const FINALIZED_TOTAL: &str = "preempt_finalized_total";

// ── Cascade metrics ─────────────────────────────────────────────

/// Counter: allocations cancelled or aborted by a cascade.
pub const CASCADE_FINALIZED_TOTAL: &str = "preempt_cascade_finalized_total";

/// Counter: allocations rescheduled in place by a cascade.
pub const CASCADE_RESCHEDULED_TOTAL: &str = "preempt_cascade_rescheduled_total";

// ── Registry state ──────────────────────────────────────────────

/// Gauge: live allocations in the registry.
pub const ALLOCATIONS_LIVE: &str = "preempt_allocations_live";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a state to a short label for metrics.
pub fn state_label(state: State) -> &'static str {
    match state {
        State::Requested => "requested",
        State::Scheduled => "scheduled",
        State::Allocated => "allocated",
        State::Cancelled => "cancelled",
        State::Aborted => "aborted",
        State::Released => "released",
        State::Rejected => "rejected",
    }
}
