use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::gpx::GpxError;
use crate::services::resolver::ResolveError;
use crate::services::sampler::SamplerError;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Always empty
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<serde_json::Value>,
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::BadRequest(msg) | AppError::ServiceUnavailable(msg) => msg,
        };

        (
            status,
            axum::Json(ErrorResponse {
                success: false,
                data: Vec::new(),
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<GpxError> for AppError {
    fn from(err: GpxError) -> Self {
        AppError::BadRequest(format!("GPX parsing error: {}", err))
    }
}

impl From<SamplerError> for AppError {
    fn from(err: SamplerError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            // Batches absorb per-point exhaustion as null entries; a lone
            // exhausted lookup means no provider could answer right now.
            ResolveError::NoProviders
            | ResolveError::AllProvidersUnavailable
            | ResolveError::Exhausted { .. } => AppError::ServiceUnavailable(err.to_string()),
            ResolveError::InvalidTime(_) => AppError::BadRequest(err.to_string()),
            ResolveError::Aborted(_) => AppError::InternalError(err.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(format!("Invalid query: {}", rejection.body_text()))
    }
}
