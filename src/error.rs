use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Failures while bringing up a stress generation.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port must be non-zero")]
    ZeroPort,
    #[error("block size must be at least 1 MiB")]
    ZeroBlockSize,
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("default memory limit must be at least 1 MiB")]
    ZeroDefaultLimit,
}

/// Errors surfaced to HTTP callers as plain-text bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    Stress(#[from] StressError),
    #[error("blocking task failed: {0}")]
    Blocking(String),
}

impl From<BlockingError> for ApiError {
    fn from(e: BlockingError) -> Self {
        ApiError::Blocking(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Stress(_) | ApiError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
