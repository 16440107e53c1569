use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec,
    IntGaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();
    pub static ref CACHE_HITS: IntCounter =
        register_int_counter!("cache_hits_total", "Total number of price cache hits").unwrap();
    pub static ref CACHE_MISSES: IntCounter =
        register_int_counter!("cache_misses_total", "Total number of price cache misses").unwrap();
    pub static ref X402_VERIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "x402_verifications_total",
        "Total number of x402 payment verifications",
        &["status"]
    )
    .unwrap();
    pub static ref UPSTREAM_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "upstream_requests_total",
        "Total number of upstream price requests",
        &["status"]
    )
    .unwrap();
    pub static ref UPSTREAM_DURATION: Histogram = register_histogram!(
        "upstream_request_duration_seconds",
        "Upstream price request duration in seconds",
        vec![0.1, 0.2, 0.5, 1.0, 2.0, 5.0]
    )
    .unwrap();
    /// 0 = closed, 1 = open, 2 = half-open
    pub static ref CIRCUIT_BREAKER_STATE: IntGaugeVec = register_int_gauge_vec!(
        "circuit_breaker_state",
        "Circuit breaker current state (0=CLOSED, 1=OPEN, 2=HALF_OPEN)",
        &["service"]
    )
    .unwrap();
    pub static ref CIRCUIT_BREAKER_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "circuit_breaker_rejections_total",
        "Calls rejected by an open circuit breaker",
        &["service"]
    )
    .unwrap();
}

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
