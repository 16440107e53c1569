use crate::{
    config::Environment,
    error::OracleError,
    middleware::payment_instructions,
    models::PaymentHeaders,
    services::PricePipeline,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PricePipeline>,
    pub environment: Environment,
    pub max_body_bytes: usize,
}

pub async fn get_price(
    State(state): State<AppState>,
    headers: PaymentHeaders,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(body)) => state.pipeline.handle(&body, &headers).await,
        Err(rejection) => Err(OracleError::InvalidBody(rejection.body_text())),
    };

    match result {
        Ok(quote) => Json(quote).into_response(),
        Err(e) => e.into_response_with(
            state.environment.is_development(),
            Some(payment_instructions(state.pipeline.payment_config())),
        ),
    }
}
