use axum::{http::StatusCode, Json};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Errors raised by the conference coordinator and its collaborators
#[derive(Debug, Error)]
pub enum ConferenceError {
    /// Policy violations
    #[error("Programming language ({0}) not supported")]
    UnsupportedLanguage(String),

    #[error("Code is currently running for session {0}")]
    RunInProgress(i32),

    #[error("Code {0} not found")]
    CodeNotFound(i32),

    #[error("Result already recorded for code {0}")]
    ResultAlreadyRecorded(i32),

    /// Topic router errors
    #[error("Topic {0} not found")]
    TopicNotFound(String),

    #[error("Failed to publish: {0}")]
    Publish(String),

    /// Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document store error: {0}")]
    Mirror(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The code record is committed but could not be mirrored or dispatched
    #[error("Code {code_id} recorded but not dispatched: {reason}")]
    Dispatch { code_id: i32, reason: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using ConferenceError
pub type Result<T> = std::result::Result<T, ConferenceError>;

impl ConferenceError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        ConferenceError::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ConferenceError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            ConferenceError::RunInProgress(_) | ConferenceError::ResultAlreadyRecorded(_) => {
                StatusCode::CONFLICT
            }
            ConferenceError::CodeNotFound(_) => StatusCode::NOT_FOUND,
            ConferenceError::TopicNotFound(_)
            | ConferenceError::Publish(_)
            | ConferenceError::Mirror(_)
            | ConferenceError::Dispatch { .. } => StatusCode::BAD_GATEWAY,
            ConferenceError::Database(_)
            | ConferenceError::Serialization(_)
            | ConferenceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the error the way handlers reply to clients
    pub fn to_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                code: status.as_u16(),
                status: status.to_string(),
                error: self.to_string(),
            }),
        )
    }
}
