use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roomledger_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roomledger_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomledger_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomledger_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomledger_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomledger_wal_compactions_total";

// ── Booking lifecycle ───────────────────────────────────────────

pub const BOOKINGS_RESERVED_TOTAL: &str = "roomledger_bookings_reserved_total";
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "roomledger_bookings_confirmed_total";
pub const BOOKINGS_CANCELLED_TOTAL: &str = "roomledger_bookings_cancelled_total";

/// Counter: reservation attempts refused for lack of capacity.
pub const BOOKINGS_UNAVAILABLE_TOTAL: &str = "roomledger_bookings_unavailable_total";

/// Counter: expired holds whose capacity went back to the ledger. Labels: path (lazy, reaper).
pub const HOLDS_RELEASED_TOTAL: &str = "roomledger_holds_released_total";

/// Counter: late payments refunded because the released capacity was gone.
pub const PAYMENTS_VOIDED_TOTAL: &str = "roomledger_payments_voided_total";

/// Counter: payment gateway call failures. Labels: call (create_session, refund).
pub const GATEWAY_FAILURES_TOTAL: &str = "roomledger_gateway_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
