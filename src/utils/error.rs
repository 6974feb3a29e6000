use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// API Error with rich context and automatic error trait implementations
///
/// Design: thiserror for ergonomic error handling with context.
/// Each variant carries enough to tell the caller what went wrong without
/// leaking engine internals.
#[derive(Error, Debug)]
pub enum ApiError {
    // Validation errors 1xxx
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    // Connection errors 2xxx
    #[error("Credential resolution failed for connection '{connection}'")]
    AuthMissing { connection: String },

    #[error("Failed to connect to database: {message}")]
    ConnectionFailed { message: String },

    // Resource errors 3xxx
    #[error("Not found: {0}")]
    NotFound(String),

    // Job errors 4xxx
    #[error("Job cancelled")]
    Cancelled,

    // Pipeline / provider errors 5xxx
    #[error("Cost limit exceeded: {0}")]
    CostExceeded(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Stage '{stage}' failed: {cause}")]
    StageFailed { stage: String, cause: String },

    #[error("Profiling facet '{facet}' failed: {cause}")]
    FacetFailed { facet: String, cause: String },

    #[error("Internal error: {0}")]
    InternalError(String),

    // Database errors - auto-convert from sqlx::Error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn invalid_identifier(name: impl Into<String>) -> Self {
        Self::InvalidIdentifier(name.into())
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn auth_missing(connection: impl Into<String>) -> Self {
        Self::AuthMissing { connection: connection.into() }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn cost_exceeded(message: impl Into<String>) -> Self {
        Self::CostExceeded(message.into())
    }

    pub fn llm_unavailable(message: impl Into<String>) -> Self {
        Self::LlmUnavailable(message.into())
    }

    pub fn stage_failed(stage: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::StageFailed { stage: stage.into(), cause: cause.to_string() }
    }

    pub fn facet_failed(facet: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::FacetFailed { facet: facet.into(), cause: cause.to_string() }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Stable error code surfaced alongside the message
    pub fn error_code(&self) -> i32 {
        match self {
            // Validation errors 1xxx
            Self::InvalidIdentifier(_) => 1001,
            Self::ValidationError(_) => 1002,

            // Connection errors 2xxx
            Self::AuthMissing { .. } => 2001,
            Self::ConnectionFailed { .. } => 2002,

            // Resource errors 3xxx
            Self::NotFound(_) => 3001,

            // Job errors 4xxx
            Self::Cancelled => 4001,

            // Pipeline / provider / system errors 5xxx
            Self::CostExceeded(_) => 5001,
            Self::LlmUnavailable(_) => 5002,
            Self::StageFailed { .. } => 5003,
            Self::FacetFailed { .. } => 5004,
            Self::InternalError(_) => 5005,
            Self::Database(_) => 5006,
            Self::Other(_) => 5005,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let message = self.to_string();

        // 4xx for caller mistakes (validation, not-found, cancellation);
        // 5xx for internal, provider, and cost failures.
        let status = match code {
            1001..=1999 => StatusCode::BAD_REQUEST,
            2001..=2999 => StatusCode::INTERNAL_SERVER_ERROR,
            3001..=3999 => StatusCode::NOT_FOUND,
            4001..=4999 => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let response = ApiErrorResponse { code, message, details: None };

        (status, Json(response)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal_error(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::internal_error(format!("I/O error: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
