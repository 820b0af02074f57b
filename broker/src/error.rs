//! Typed error model shared by every component boundary.
//!
//! Components return `BrokerError`; the HTTP edge is the only place that maps
//! a variant to a status code and a `{success, error, message}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("{0}")]
    InputInvalid(String),

    #[error("no active session")]
    Unauthorized,

    #[error("session does not own this resource")]
    Forbidden,

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is gone")]
    Gone(String),

    #[error("session expired")]
    SessionExpired,

    #[error("credential issuer not accepted: {0}")]
    InvalidIssuer(String),

    #[error("presentation challenge mismatch")]
    ChallengeMismatch,

    #[error("presentation domain mismatch")]
    DomainMismatch,

    #[error("registry signature mismatch at {path}")]
    IntegrityViolation { path: String },

    #[error("upstream error ({status}): {detail}")]
    UpstreamError { status: u16, detail: String },

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    fn kind(&self) -> &'static str {
        match self {
            BrokerError::InputInvalid(_) => "InputInvalid",
            BrokerError::Unauthorized => "Unauthorized",
            BrokerError::Forbidden => "Forbidden",
            BrokerError::AccessDenied(_) => "AccessDenied",
            BrokerError::NotFound(_) => "NotFound",
            BrokerError::Gone(_) => "Gone",
            BrokerError::SessionExpired => "SessionExpired",
            BrokerError::InvalidIssuer(_) => "InvalidIssuer",
            BrokerError::ChallengeMismatch => "ChallengeMismatch",
            BrokerError::DomainMismatch => "DomainMismatch",
            BrokerError::IntegrityViolation { .. } => "IntegrityViolation",
            BrokerError::UpstreamError { .. } => "UpstreamError",
            BrokerError::Conflict(_) => "Conflict",
            BrokerError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            BrokerError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            BrokerError::Unauthorized | BrokerError::SessionExpired => StatusCode::UNAUTHORIZED,
            BrokerError::Forbidden
            | BrokerError::AccessDenied(_)
            | BrokerError::InvalidIssuer(_)
            | BrokerError::ChallengeMismatch
            | BrokerError::DomainMismatch => StatusCode::FORBIDDEN,
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::Gone(_) => StatusCode::GONE,
            BrokerError::IntegrityViolation { .. } | BrokerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BrokerError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            BrokerError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(kind = self.kind(), %self, "request failed");
        let body = ErrorBody {
            success: false,
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
