use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Request counters
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("mps_requests_total", "Total number of paywalled content requests"),
        &["method", "status"],
    )
    .unwrap()
});

// Payment counters
pub static PAYMENTS_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "mps_payments_accepted_total",
        "Total number of accepted balance proofs",
    )
    .unwrap()
});

pub static PAYMENTS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mps_payments_rejected_total",
            "Requests answered with 402, by reason",
        ),
        &["reason"],
    )
    .unwrap()
});

pub static REVENUE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "mps_revenue_total",
        "Balance collected in token base units (saturating)",
    )
    .unwrap()
});

// Channel closes
pub static COOPERATIVE_CLOSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mps_cooperative_closes_total",
            "Cooperative close attempts, by outcome",
        ),
        &["outcome"],
    )
    .unwrap()
});

// Upstream metrics
pub static UPSTREAM_REQUESTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "mps_upstream_requests_total",
        "Total number of requests forwarded upstream",
    )
    .unwrap()
});

pub static UPSTREAM_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("mps_upstream_latency_seconds", "Upstream request latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(REQUESTS_TOTAL.clone())).unwrap();
        REGISTRY
            .register(Box::new(PAYMENTS_ACCEPTED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(PAYMENTS_REJECTED.clone()))
            .unwrap();
        REGISTRY.register(Box::new(REVENUE_TOTAL.clone())).unwrap();
        REGISTRY
            .register(Box::new(COOPERATIVE_CLOSES.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(UPSTREAM_REQUESTS_TOTAL.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(UPSTREAM_LATENCY.clone()))
            .unwrap();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_is_harmless() {
        register_metrics();
        register_metrics();
        PAYMENTS_REJECTED.with_label_values(&["stale_balance"]).inc();
        let mut buffer = Vec::new();
        prometheus::Encoder::encode(&prometheus::TextEncoder::new(), &REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("mps_payments_rejected_total{reason=\"stale_balance\"}"));
    }
}
