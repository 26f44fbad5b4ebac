use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Rejections produced while parsing client-supplied identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("class name cannot be empty")]
    Empty,
    #[error("class name '{0}' must start with a letter")]
    InvalidStart(String),
    #[error("class name '{0}' may only contain letters, digits and underscores")]
    InvalidCharacter(String),
}

impl From<NameError> for ApiError {
    fn from(value: NameError) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
