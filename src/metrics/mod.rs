//! Prometheus-based metrics module
//!
//! Holds the crate-level registry plus the two lazily-populated caches the
//! outbound HTTP pipeline feeds: per-destination upstream counters and
//! per-identity request duration histograms. Cache entries wrap prometheus
//! label children, so every update is an atomic on shared state and safe
//! across concurrently handled exchanges.

mod correlator;

pub use correlator::{ExchangeContext, HttpMetricsCorrelator, ResponseHead, STATS_HEADER};

use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

/// Destination label used when the routing decision never resolved a cluster.
/// Keeps totals reconcilable instead of dropping the exchange.
pub const UNKNOWN_DESTINATION: &str = "unknown";

/// Default cap on distinct request-identity histogram entries. Identity
/// tokens arrive from responses and are never evicted, so admission stops
/// once the cache is full.
pub const MAX_IDENTITY_ENTRIES: usize = 4096;

lazy_static! {
    /// Global prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Completed exchanges per destination cluster
    static ref UPSTREAM_COMPLETED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ecnet_upstream_completed_total",
            "Completed outbound exchanges per destination cluster"
        ),
        &["cluster"]
    ).unwrap();

    /// Responses observed per destination cluster
    static ref UPSTREAM_RESPONSE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ecnet_upstream_response_total",
            "Responses observed per destination cluster"
        ),
        &["cluster"]
    ).unwrap();

    /// Responses per destination cluster and status code
    static ref UPSTREAM_RESPONSE_CODE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ecnet_upstream_response_code_total",
            "Responses per destination cluster and HTTP status code"
        ),
        &["cluster", "code"]
    ).unwrap();

    /// Responses per destination cluster and status class (2xx, 5xx, ...)
    static ref UPSTREAM_RESPONSE_CLASS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ecnet_upstream_response_class_total",
            "Responses per destination cluster and HTTP status class"
        ),
        &["cluster", "class"]
    ).unwrap();

    /// Outbound request duration per request identity
    static ref REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "ecnet_request_duration_seconds",
            "Outbound request duration per request identity"
        ).buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["identity"]
    ).unwrap();
}

/// Register all metrics with the global registry. Idempotent.
pub fn init_metrics() {
    REGISTRY.register(Box::new(UPSTREAM_COMPLETED_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(UPSTREAM_RESPONSE_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(UPSTREAM_RESPONSE_CODE_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(UPSTREAM_RESPONSE_CLASS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(REQUEST_DURATION_SECONDS.clone())).ok();
}

/// Encode the registry in prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut out = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut out) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(out).unwrap_or_default()
}

/// Counter bundle for one destination cluster.
///
/// One instance per cluster name, shared across every concurrent exchange
/// routed there. All counters are atomic label children.
pub struct DestinationMetrics {
    name: Arc<str>,
    completed: IntCounter,
    response_total: IntCounter,
}

impl DestinationMetrics {
    fn new(name: Arc<str>) -> Self {
        let completed = UPSTREAM_COMPLETED_TOTAL.with_label_values(&[&name]);
        let response_total = UPSTREAM_RESPONSE_TOTAL.with_label_values(&[&name]);
        Self {
            name,
            completed,
            response_total,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Count one completed exchange.
    pub fn record_exchange(&self) {
        self.completed.inc();
        self.response_total.inc();
    }

    /// Count the response's status code and class.
    pub fn record_status(&self, code: u16) {
        UPSTREAM_RESPONSE_CODE_TOTAL
            .with_label_values(&[&self.name, &code.to_string()])
            .inc();
        UPSTREAM_RESPONSE_CLASS_TOTAL
            .with_label_values(&[&self.name, &class_label(code / 100)])
            .inc();
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.get()
    }

    pub fn response_total_count(&self) -> u64 {
        self.response_total.get()
    }

    pub fn status_code_count(&self, code: u16) -> u64 {
        UPSTREAM_RESPONSE_CODE_TOTAL
            .with_label_values(&[&self.name, &code.to_string()])
            .get()
    }

    pub fn status_class_count(&self, class: u16) -> u64 {
        UPSTREAM_RESPONSE_CLASS_TOTAL
            .with_label_values(&[&self.name, &class_label(class)])
            .get()
    }
}

fn class_label(class: u16) -> String {
    format!("{}xx", class)
}

/// The two concurrent get-or-create caches feeding the outbound HTTP
/// pipeline. Lookups are idempotent per key: concurrent exchanges for the
/// same new destination land on a single shared instance.
pub struct MetricsStore {
    destinations: DashMap<Arc<str>, Arc<DestinationMetrics>>,
    identities: DashMap<Arc<str>, Histogram>,
    identity_cap: usize,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::with_identity_cap(MAX_IDENTITY_ENTRIES)
    }

    pub fn with_identity_cap(identity_cap: usize) -> Self {
        init_metrics();
        Self {
            destinations: DashMap::new(),
            identities: DashMap::new(),
            identity_cap,
        }
    }

    /// Get or create the counter bundle for a destination. `None` resolves
    /// to the `unknown` sentinel.
    pub fn destination(&self, name: Option<&str>) -> Arc<DestinationMetrics> {
        let key: Arc<str> = Arc::from(name.unwrap_or(UNKNOWN_DESTINATION));
        self.destinations
            .entry(key.clone())
            .or_insert_with(|| Arc::new(DestinationMetrics::new(key)))
            .clone()
    }

    /// Get or create the duration histogram for a request identity.
    ///
    /// Returns `None` for a token not seen before once the cache is full;
    /// the cap is approximate under concurrent first admissions.
    pub fn identity(&self, token: &str) -> Option<Histogram> {
        if let Some(hist) = self.identities.get(token) {
            return Some(hist.clone());
        }
        if self.identities.len() >= self.identity_cap {
            warn!(
                "Identity histogram cache full ({} entries), dropping observation for new token",
                self.identity_cap
            );
            return None;
        }
        Some(
            self.identities
                .entry(Arc::from(token))
                .or_insert_with(|| REQUEST_DURATION_SECONDS.with_label_values(&[token]))
                .clone(),
        )
    }

    /// Number of distinct identity tokens currently tracked.
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_get_or_create_is_idempotent() {
        let store = MetricsStore::new();
        let a = store.destination(Some("idem-cluster"));
        let b = store.destination(Some("idem-cluster"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_destination_sentinel() {
        let store = MetricsStore::new();
        let metrics = store.destination(None);
        assert_eq!(metrics.name(), UNKNOWN_DESTINATION);
    }

    #[test]
    fn test_concurrent_destination_creation_shares_one_instance() {
        let store = Arc::new(MetricsStore::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let metrics = store.destination(Some("race-cluster"));
                    metrics.record_exchange();
                    metrics
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(Arc::ptr_eq(&results[0], &results[1]));
        assert_eq!(results[0].completed_count(), 2);
        assert_eq!(results[0].response_total_count(), 2);
    }

    #[test]
    fn test_identity_cap_stops_admission() {
        let store = MetricsStore::with_identity_cap(2);
        assert!(store.identity("cap-tok-1").is_some());
        assert!(store.identity("cap-tok-2").is_some());
        // New token bounces, known token still resolves.
        assert!(store.identity("cap-tok-3").is_none());
        assert!(store.identity("cap-tok-1").is_some());
        assert_eq!(store.identity_count(), 2);
    }

    #[test]
    fn test_gather_text_contains_metrics() {
        let store = MetricsStore::new();
        store.destination(Some("gather-cluster")).record_exchange();
        let text = gather_text();
        assert!(text.contains("ecnet_upstream_completed_total"));
    }
}
