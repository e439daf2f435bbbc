use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use event_bus::BusError;
use feature_engine::EngineError;
use feature_store::StoreError;
use serde_json::json;
use thiserror::Error;
use types::errors::ValidationError;

/// Central error type for the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Neither cache nor store answered and nothing was served before
    #[error("feature service unavailable: {0}")]
    Unavailable(String),

    #[error("no features recorded for {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("event rejected: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Rejected(Vec<ValidationError>),

    #[error("rate limit exceeded for {0}")]
    RateLimitExceeded(String),

    #[error("event bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable code used in response bodies and rejection counters
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Rejected(errors) => errors
                .first()
                .map(ValidationError::code)
                .unwrap_or("rejected"),
            GatewayError::RateLimitExceeded(_) => "rate_limited",
            GatewayError::BusUnavailable(_) => "bus_unavailable",
            GatewayError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unavailable(_) | GatewayError::BusUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) | GatewayError::Rejected(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BusError> for GatewayError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Unavailable(msg) => GatewayError::BusUnavailable(msg),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay in the logs
            GatewayError::Internal(detail) => {
                tracing::error!(error = %detail, "internal gateway error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Failures while wiring the service together
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event bus: {0}")]
    Bus(#[from] BusError),

    #[error("feature store: {0}")]
    Store(#[from] StoreError),

    #[error("feature engine: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
