use serde::Serialize;
use thiserror::Error;

pub const GENERIC_ERROR_MESSAGE: &str = "unexpected error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Auth,
    Validation,
    Hardware,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Auth => "AUTH_ERROR",
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::Hardware => "HARDWARE_ERROR",
            ErrorCode::Unexpected => "UNEXPECTED_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Hardware(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn auth(message: impl Into<String>) -> Self {
        GatewayError::Auth(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        GatewayError::Hardware(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Auth(_) => ErrorCode::Auth,
            GatewayError::Validation(_) => ErrorCode::Validation,
            GatewayError::Hardware(_) => ErrorCode::Hardware,
            GatewayError::Unexpected(_) => ErrorCode::Unexpected,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Unexpected(_) => GENERIC_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: String,
    pub error_message: String,
}

impl From<&GatewayError> for ApiError {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code().as_str().to_string(),
            error_message: err.client_message(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Unexpected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_detail_is_not_exposed() {
        let err = GatewayError::Unexpected("disk on fire at /var/lib/podgate".to_string());
        let body = ApiError::from(&err);
        assert_eq!(body.code, "UNEXPECTED_ERROR");
        assert_eq!(body.error_message, GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn auth_message_is_passed_through() {
        let err = GatewayError::auth("invalid authentication token");
        let body = ApiError::from(&err);
        assert_eq!(body.code, "AUTH_ERROR");
        assert_eq!(body.error_message, "invalid authentication token");
    }
}
