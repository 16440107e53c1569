use crate::models::PaymentFailure;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PaymentRequired,
    PaymentInvalid,
    TokenNotFound,
    ServiceUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::PaymentRequired | ErrorKind::PaymentInvalid => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::TokenNotFound => StatusCode::NOT_FOUND,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Invalid chainId: {0}")]
    InvalidChainId(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Payment required: missing {}", .missing.join(", "))]
    PaymentRequired { missing: Vec<&'static str> },

    #[error("Payment verification failed: {0}")]
    PaymentInvalid(PaymentFailure),

    #[error("Token not found on chain {chain_id}")]
    TokenNotFound { chain_id: u32 },

    #[error("Service temporarily unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::InvalidChainId(_)
            | OracleError::InvalidAddress(_)
            | OracleError::InvalidBody(_) => ErrorKind::Validation,
            OracleError::PaymentRequired { .. } => ErrorKind::PaymentRequired,
            OracleError::PaymentInvalid(_) => ErrorKind::PaymentInvalid,
            OracleError::TokenNotFound { .. } => ErrorKind::TokenNotFound,
            OracleError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            OracleError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OracleError::InvalidChainId(_) => "INVALID_CHAIN_ID",
            OracleError::InvalidAddress(_) => "INVALID_ADDRESS",
            OracleError::InvalidBody(_) => "VALIDATION_ERROR",
            OracleError::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            OracleError::PaymentInvalid(_) => "PAYMENT_INVALID",
            OracleError::TokenNotFound { .. } => "TOKEN_NOT_FOUND",
            OracleError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            OracleError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    fn message(&self) -> &'static str {
        match self {
            OracleError::InvalidChainId(_) => "Invalid chainId",
            OracleError::InvalidAddress(_) => "Invalid address",
            OracleError::InvalidBody(_) => "Invalid request body",
            OracleError::PaymentRequired { .. } | OracleError::PaymentInvalid(_) => {
                "Payment verification failed"
            }
            OracleError::TokenNotFound { .. } => "Token not found",
            OracleError::ServiceUnavailable(_) => "Service temporarily unavailable",
            OracleError::Internal(_) => "Internal server error",
        }
    }

    fn details(&self) -> String {
        match self {
            OracleError::InvalidChainId(d)
            | OracleError::InvalidAddress(d)
            | OracleError::InvalidBody(d)
            | OracleError::ServiceUnavailable(d)
            | OracleError::Internal(d) => d.clone(),
            OracleError::PaymentRequired { missing } => {
                format!("Missing required x402 headers: {}", missing.join(", "))
            }
            OracleError::PaymentInvalid(reason) => reason.to_string(),
            OracleError::TokenNotFound { chain_id } => {
                format!("Token address not found on chain {}", chain_id)
            }
        }
    }

    /// Renders the error body. Server-side details are only exposed in development.
    pub fn to_body(&self, expose_internal: bool) -> ErrorResponse {
        let details = if self.status().is_server_error() && !expose_internal {
            None
        } else {
            Some(self.details())
        };

        ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.message().to_string(),
                details,
            },
            payment: None,
        }
    }

    pub fn into_response_with(
        self,
        expose_internal: bool,
        payment: Option<PaymentInstructions>,
    ) -> Response {
        let status = self.status();
        let mut body = self.to_body(expose_internal);
        if matches!(self, OracleError::PaymentRequired { .. }) {
            body.payment = payment;
        }

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = self.code(), "Request failed");
        } else {
            tracing::warn!(error = %self, error_code = self.code(), "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: ErrorBody,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentInstructions>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentInstructions {
    pub chain: String,
    pub amount: String,
    pub recipient: String,
    pub headers: PaymentHeaderNames,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentHeaderNames {
    pub signature: String,
    pub payment_id: String,
    pub chain: String,
}

impl IntoResponse for OracleError {
    fn into_response(self) -> Response {
        self.into_response_with(false, None)
    }
}
