//! Prometheus metrics for the query router.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_request`, `inc_cache_event`, …) are no-ops if `init_metrics` was
//! never called, so the router is always safe to run; observability simply
//! degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `query_router_requests_total` | Counter | `served_by` |
//! | `query_router_outcomes_total` | Counter | `outcome` |
//! | `query_router_latency_seconds` | Histogram | `path` |
//! | `query_router_cache_events_total` | Counter | `event` |
//! | `query_router_complexity_threshold` | Gauge | |

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    core::Collector, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::RouterError;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All router metrics, stored in a single [`OnceLock`] and initialised
/// atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Requests by the path that served them.
    pub requests_total: CounterVec,
    /// Requests by outcome.
    pub outcomes_total: CounterVec,
    /// End-to-end latency by decided path.
    pub latency: HistogramVec,
    /// Cache hit / miss / eviction / corruption events.
    pub cache_events: CounterVec,
    /// Current complexity threshold.
    pub threshold: Gauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> RouterError {
    RouterError::Other(format!("metrics init failed: {e}"))
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Build a metrics bundle backed by its own registry.
fn build() -> Result<Metrics, RouterError> {
    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("query_router_requests_total", "Requests by serving path"),
        &["served_by"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(requests_total.clone()))
        .map_err(init_err)?;

    let outcomes_total = CounterVec::new(
        Opts::new("query_router_outcomes_total", "Requests by outcome"),
        &["outcome"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(outcomes_total.clone()))
        .map_err(init_err)?;

    let latency = HistogramVec::new(
        HistogramOpts::new(
            "query_router_latency_seconds",
            "End-to-end routing latency by decided path",
        )
        .buckets(vec![
            0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["path"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(latency.clone()))
        .map_err(init_err)?;

    let cache_events = CounterVec::new(
        Opts::new("query_router_cache_events_total", "Cache events by kind"),
        &["event"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(cache_events.clone()))
        .map_err(init_err)?;

    let threshold = Gauge::new(
        "query_router_complexity_threshold",
        "Complexity threshold currently in effect",
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(threshold.clone()))
        .map_err(init_err)?;

    Ok(Metrics {
        registry,
        requests_total,
        outcomes_total,
        latency,
        cache_events,
        threshold,
    })
}

/// Initialise all Prometheus metrics.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if metric construction or registration
/// fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), RouterError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // a racing initialiser builds identical descriptors; first one wins
    let _ = METRICS.set(build()?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Record one finished request.
///
/// No-op if metrics have not been initialised.
pub fn record_request(served_by: &str, outcome: &str, path: &str, latency: Duration) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[served_by]) {
            c.inc();
        }
        if let Ok(c) = m.outcomes_total.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
        if let Ok(h) = m.latency.get_metric_with_label_values(&[path]) {
            h.observe(latency.as_secs_f64());
        }
    }
}

/// Increment the cache event counter (`hit`, `miss`, `eviction`,
/// `expiration`, `corruption`).
///
/// No-op if metrics have not been initialised.
pub fn inc_cache_event(event: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_events.get_metric_with_label_values(&[event]) {
            c.inc();
        }
    }
}

/// Publish the threshold currently in effect.
///
/// No-op if metrics have not been initialised.
pub fn set_threshold(threshold: f64) {
    if let Some(m) = metrics() {
        m.threshold.set(threshold);
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    encode(&m.registry)
}

fn encode(registry: &Registry) -> String {
    let families = registry.gather();
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Structured snapshot of the counters.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetricsSummary {
    /// Requests keyed by `served_by`.
    pub requests_total: HashMap<String, u64>,
    /// Requests keyed by `outcome`.
    pub outcomes_total: HashMap<String, u64>,
    /// Cache events keyed by `event`.
    pub cache_events: HashMap<String, u64>,
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}

fn summarize(m: &Metrics) -> MetricsSummary {
    MetricsSummary {
        requests_total: counts(&m.requests_total, "served_by"),
        outcomes_total: counts(&m.outcomes_total, "outcome"),
        cache_events: counts(&m.cache_events, "event"),
    }
}

fn counts(vec: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}
