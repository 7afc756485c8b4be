//! Request/response metrics correlation for the outbound HTTP pipeline
//!
//! The correlator sits at the two edges of an exchange: it stamps the request
//! when its head enters the pipeline and, when the matching response head
//! arrives, resolves the destination's counter bundle, observes the request
//! duration into the identity histogram named by the `ecnet-stats` response
//! header, and strips that header before the response travels on.
//!
//! An `ExchangeContext` is consumed by `on_response_start`, so a context can
//! never be replayed against a second response. Contexts for abandoned
//! exchanges (response never arrives) are dropped with the connection's task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::MetricsStore;

/// Internal correlation header carried on outbound responses. Never
/// forwarded to the real client.
pub const STATS_HEADER: &str = "ecnet-stats";

/// Per-exchange state: the request start timestamp.
///
/// Created when the request head is seen, consumed when the response head is
/// seen. Exactly one exists per in-flight exchange.
#[derive(Debug)]
pub struct ExchangeContext {
    started_at: Instant,
}

impl ExchangeContext {
    fn begin() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Time since the request head entered the pipeline.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Response metadata the collaborating HTTP codec hands the correlator.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    pub status: Option<u16>,
    /// Header names are expected lowercased, as the codec normalizes them.
    pub headers: HashMap<String, String>,
}

impl ResponseHead {
    pub fn new(status: Option<u16>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// Correlates request starts with response starts and updates the shared
/// metrics caches exactly once per exchange.
pub struct HttpMetricsCorrelator {
    store: Arc<MetricsStore>,
}

impl HttpMetricsCorrelator {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self { store }
    }

    /// Called when a request head enters the outbound pipeline. Only stamps
    /// the exchange; never blocks.
    pub fn on_request_start(&self) -> ExchangeContext {
        ExchangeContext::begin()
    }

    /// Called when the matching response head arrives.
    ///
    /// `destination` is the cluster the routing module already selected for
    /// this exchange; `None` lands on the `unknown` sentinel. Best-effort
    /// throughout: a missing token or status degrades to partial metrics,
    /// never a failed exchange.
    pub fn on_response_start(
        &self,
        exchange: ExchangeContext,
        head: &mut ResponseHead,
        destination: Option<&str>,
    ) {
        let metrics = self.store.destination(destination);

        // Duration is taken before any header mutation, and the header is
        // stripped before the response moves downstream.
        if let Some(token) = head.headers.remove(STATS_HEADER) {
            let duration = exchange.elapsed();
            if let Some(hist) = self.store.identity(&token) {
                hist.observe(duration.as_secs_f64());
            }
        }

        metrics.record_exchange();
        if let Some(code) = head.status {
            metrics.record_status(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn correlator() -> (Arc<MetricsStore>, HttpMetricsCorrelator) {
        let store = Arc::new(MetricsStore::new());
        let correlator = HttpMetricsCorrelator::new(store.clone());
        (store, correlator)
    }

    #[test]
    fn test_full_exchange_updates_all_metrics() {
        let (store, correlator) = correlator();

        let exchange = correlator.on_request_start();
        thread::sleep(Duration::from_millis(50));

        let mut head = ResponseHead::new(Some(200)).with_header(STATS_HEADER, "tok1");
        correlator.on_response_start(exchange, &mut head, Some("clusterA"));

        let metrics = store.destination(Some("clusterA"));
        assert_eq!(metrics.completed_count(), 1);
        assert_eq!(metrics.response_total_count(), 1);
        assert_eq!(metrics.status_code_count(200), 1);
        assert_eq!(metrics.status_class_count(2), 1);

        let hist = store.identity("tok1").unwrap();
        assert_eq!(hist.get_sample_count(), 1);
        let observed = hist.get_sample_sum();
        assert!(observed >= 0.050, "observed {}s, expected >= 50ms", observed);
        assert!(observed < 1.0, "observed {}s, expected well under 1s", observed);

        // The token is an internal signal and must not travel downstream.
        assert!(!head.headers.contains_key(STATS_HEADER));
    }

    #[test]
    fn test_missing_token_skips_histogram() {
        let (store, correlator) = correlator();

        let exchange = correlator.on_request_start();
        let mut head = ResponseHead::new(Some(503));
        correlator.on_response_start(exchange, &mut head, Some("clusterB"));

        let metrics = store.destination(Some("clusterB"));
        assert_eq!(metrics.completed_count(), 1);
        assert_eq!(metrics.status_code_count(503), 1);
        assert_eq!(metrics.status_class_count(5), 1);
        assert_eq!(store.identity_count(), 0);
    }

    #[test]
    fn test_missing_status_still_counts_exchange() {
        let (store, correlator) = correlator();

        let exchange = correlator.on_request_start();
        let mut head = ResponseHead::new(None);
        correlator.on_response_start(exchange, &mut head, Some("clusterC"));

        let metrics = store.destination(Some("clusterC"));
        assert_eq!(metrics.completed_count(), 1);
        assert_eq!(metrics.response_total_count(), 1);
        assert_eq!(metrics.status_code_count(200), 0);
        assert_eq!(metrics.status_class_count(2), 0);
    }

    #[test]
    fn test_unresolved_destination_lands_on_sentinel() {
        let (store, correlator) = correlator();

        let exchange = correlator.on_request_start();
        let mut head = ResponseHead::new(Some(200));
        correlator.on_response_start(exchange, &mut head, None);

        let metrics = store.destination(None);
        assert!(metrics.completed_count() >= 1);
    }

    #[test]
    fn test_other_headers_survive_stripping() {
        let (_store, correlator) = correlator();

        let exchange = correlator.on_request_start();
        let mut head = ResponseHead::new(Some(200))
            .with_header(STATS_HEADER, "tok2")
            .with_header("content-type", "application/json");
        correlator.on_response_start(exchange, &mut head, Some("clusterD"));

        assert_eq!(
            head.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_concurrent_exchanges_same_destination() {
        let (store, correlator) = correlator();
        let correlator = Arc::new(correlator);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let correlator = correlator.clone();
                thread::spawn(move || {
                    let exchange = correlator.on_request_start();
                    let mut head =
                        ResponseHead::new(Some(200)).with_header(STATS_HEADER, &format!("ctok{}", i % 2));
                    correlator.on_response_start(exchange, &mut head, Some("clusterE"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = store.destination(Some("clusterE"));
        assert_eq!(metrics.completed_count(), 8);
        assert_eq!(metrics.status_code_count(200), 8);
        assert_eq!(store.identity_count(), 2);
        assert_eq!(
            store.identity("ctok0").unwrap().get_sample_count()
                + store.identity("ctok1").unwrap().get_sample_count(),
            8
        );
    }
}
