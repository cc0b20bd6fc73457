use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("email is already registered")]
    EmailTaken,
    #[error("duplicate `{entity}` id")]
    DuplicateId { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("forbidden words: [{}]", words.join(" "))]
    ForbiddenWords { words: Vec<String> },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
