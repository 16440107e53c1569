use crate::metrics::{HTTP_REQUESTS, HTTP_REQUEST_DURATION};
use crate::models::{CHAIN_HEADER, PAYMENT_ID_HEADER, SIGNATURE_HEADER};
use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Every event logged while handling the request carries its request id.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = header_str(request.headers(), REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().to_string();
    // Route template keeps the metric label set bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path
    );

    {
        let headers = request.headers();
        tracing::info!(
            parent: &span,
            x402_signature = headers.contains_key(SIGNATURE_HEADER).then_some("[REDACTED]"),
            x402_payment_id = header_str(headers, PAYMENT_ID_HEADER),
            x402_chain = header_str(headers, CHAIN_HEADER),
            "Request received"
        );
    }

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();

    let status = response.status();
    tracing::info!(
        parent: &span,
        status = status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );

    HTTP_REQUESTS
        .with_label_values(&[method.as_str(), path.as_str(), status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), path.as_str()])
        .observe(elapsed.as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
