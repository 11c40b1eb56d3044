//! Prometheus metrics

use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Time from submission to exchange ack
    OrderSubmission,
    /// Time to evaluate risk + strategy for one tick
    TickDecision,
    /// Claim submission round trip
    ClaimSubmission,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Cash balance
    Balance,
    /// Realized P&L since the last reset
    RealizedPnl,
    /// Open position count
    OpenPositions,
    /// Committed notional
    TotalExposure,
    /// Markets with a running monitor
    ActiveMarkets,
    /// Claims not yet confirmed
    PendingClaims,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    OrdersSubmitted,
    OrdersFilled,
    OrdersRejected,
    OrdersStale,
    OrderRetries,
    RiskExits,
    EntriesBlocked,
    ClaimsConfirmed,
    ClaimsFailed,
    ReconciliationWarnings,
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::OrderSubmission => "snipe_order_submission_latency_ms",
        LatencyMetric::TickDecision => "snipe_tick_decision_latency_ms",
        LatencyMetric::ClaimSubmission => "snipe_claim_submission_latency_ms",
    };

    ::metrics::histogram!(metric_name).record(duration.as_secs_f64() * 1_000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::Balance => "snipe_balance_usd",
        GaugeMetric::RealizedPnl => "snipe_realized_pnl_usd",
        GaugeMetric::OpenPositions => "snipe_open_positions",
        GaugeMetric::TotalExposure => "snipe_total_exposure_usd",
        GaugeMetric::ActiveMarkets => "snipe_active_markets",
        GaugeMetric::PendingClaims => "snipe_pending_claims",
    };

    ::metrics::gauge!(metric_name).set(value);
}

/// Increment a counter by one
pub fn incr_counter(metric: CounterMetric) {
    let metric_name = match metric {
        CounterMetric::OrdersSubmitted => "snipe_orders_submitted_total",
        CounterMetric::OrdersFilled => "snipe_orders_filled_total",
        CounterMetric::OrdersRejected => "snipe_orders_rejected_total",
        CounterMetric::OrdersStale => "snipe_orders_stale_total",
        CounterMetric::OrderRetries => "snipe_order_retries_total",
        CounterMetric::RiskExits => "snipe_risk_exits_total",
        CounterMetric::EntriesBlocked => "snipe_entries_blocked_total",
        CounterMetric::ClaimsConfirmed => "snipe_claims_confirmed_total",
        CounterMetric::ClaimsFailed => "snipe_claims_failed_total",
        CounterMetric::ReconciliationWarnings => "snipe_reconciliation_warnings_total",
    };

    ::metrics::counter!(metric_name).increment(1);
}
