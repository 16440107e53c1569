use crate::{
    error::{ErrorBody, ErrorResponse},
    handlers::{get_metrics, get_price, health_check, AppState},
    middleware::log_requests,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{Method, StatusCode, Uri},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Payment required
        .route("/price", post(get_price))
        // Public
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(axum_middleware::from_fn(log_requests))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn route_not_found(method: Method, uri: Uri) -> Response {
    let body = ErrorResponse {
        error: ErrorBody {
            code: "NOT_FOUND".to_string(),
            message: "Route not found".to_string(),
            details: Some(format!("Route {} {} not found", method, uri.path())),
        },
        payment: None,
    };

    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
