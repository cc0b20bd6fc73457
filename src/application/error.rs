use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::application::sessions::AuthError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

/// Internal diagnostic attached to error responses for the logging
/// middleware; never serialized to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("operation requires ownership or admin rights")]
    Forbidden,
    #[error("advertisement awaits moderation")]
    Unapproved,
    #[error("write refused: dirty queue overloaded")]
    Backpressure,
    #[error("server is stopping")]
    Stopping,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Domain(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::Disabled) => StatusCode::FORBIDDEN,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unapproved => StatusCode::LOCKED,
            AppError::Backpressure => StatusCode::TOO_MANY_REQUESTS,
            AppError::Stopping => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message for the error envelope. Validation and
    /// moderation failures carry their own wording; everything else is
    /// generic.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Domain(err @ DomainError::NotFound { .. }) => err.to_string(),
            AppError::Domain(err @ DomainError::EmailTaken) => err.to_string(),
            AppError::Domain(err @ DomainError::Validation { .. }) => err.to_string(),
            AppError::Domain(err @ DomainError::ForbiddenWords { .. }) => err.to_string(),
            AppError::Domain(DomainError::DuplicateId { .. }) => {
                "internal id collision".to_string()
            }
            AppError::Auth(err) => err.to_string(),
            AppError::Forbidden => "forbidden".to_string(),
            AppError::Unapproved => "advertisement awaits moderation".to_string(),
            AppError::Backpressure => "server is overloaded, retry later".to_string(),
            AppError::Stopping => "server is stopping".to_string(),
            AppError::Infra(_) | AppError::Unexpected(_) => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.public_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
