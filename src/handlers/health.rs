use crate::{
    handlers::AppState,
    models::{DependencyStatus, HealthStatus, OverallStatus},
    services::CircuitState,
};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let cache = if state.pipeline.cache().ping().await {
        DependencyStatus::Connected
    } else {
        DependencyStatus::Disconnected
    };

    let circuit = state.pipeline.price_feed().circuit_state().await;
    let upstream = if circuit == CircuitState::Open {
        DependencyStatus::Disconnected
    } else {
        DependencyStatus::Connected
    };

    let status = HealthStatus::overall(cache, upstream);
    let code = if status == OverallStatus::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthStatus {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache,
            upstream,
            circuit: circuit.to_string(),
            timestamp: Utc::now(),
        }),
    )
}
