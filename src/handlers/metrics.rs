use crate::metrics::metrics_output;
use axum::{http::header, response::IntoResponse};

pub async fn get_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics_output(),
    )
}
