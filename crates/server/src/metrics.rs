use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static CUSTOMER_SAVES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static CUSTOMER_SEARCHES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "taxreg_server_http_requests_total",
                    "Server HTTP request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create taxreg_server_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "taxreg_server_http_request_duration_seconds",
                    "Server HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ]),
                &["route", "method"],
            )
            .expect("create taxreg_server_http_request_duration_seconds"),
        )
    })
}

fn customer_saves_total() -> &'static IntCounterVec {
    CUSTOMER_SAVES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "taxreg_server_customer_saves_total",
                    "Customer create/update outcomes.",
                ),
                &["mode", "outcome"],
            )
            .expect("create taxreg_server_customer_saves_total"),
        )
    })
}

fn customer_searches_total() -> &'static IntCounterVec {
    CUSTOMER_SEARCHES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "taxreg_server_customer_searches_total",
                    "Customer search outcomes.",
                ),
                &["outcome"],
            )
            .expect("create taxreg_server_customer_searches_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, elapsed: Duration) {
    let status = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status.as_str()])
        .inc();
    http_request_duration_seconds()
        .with_label_values(&[route, method])
        .observe(elapsed.as_secs_f64());
}

pub fn inc_customer_save(mode: &str, outcome: &str) {
    customer_saves_total()
        .with_label_values(&[mode, outcome])
        .inc();
}

pub fn inc_customer_search(outcome: &str) {
    customer_searches_total().with_label_values(&[outcome]).inc();
}

pub fn render() -> Result<(String, String), prometheus::Error> {
    // Touch every collector so the exposition is complete even before the
    // first request.
    let _ = http_requests_total();
    let _ = http_request_duration_seconds();
    let _ = customer_saves_total();
    let _ = customer_searches_total();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry().gather(), &mut buffer)?;

    let body = String::from_utf8(buffer).unwrap_or_default();
    Ok((body, encoder.format_type().to_string()))
}
