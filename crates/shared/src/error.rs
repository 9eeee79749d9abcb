use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fault codes a producer may report, modelled on the WSRP fault set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidHandle,
    InvalidRegistration,
    InvalidUserCategory,
    AccessDenied,
    MissingParameters,
    UnsupportedMode,
    UnsupportedWindowState,
    UnsupportedLocale,
    OperationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidHandle => "invalid_handle",
            ErrorCode::InvalidRegistration => "invalid_registration",
            ErrorCode::InvalidUserCategory => "invalid_user_category",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::MissingParameters => "missing_parameters",
            ErrorCode::UnsupportedMode => "unsupported_mode",
            ErrorCode::UnsupportedWindowState => "unsupported_window_state",
            ErrorCode::UnsupportedLocale => "unsupported_locale",
            ErrorCode::OperationFailed => "operation_failed",
        }
    }
}

/// Structured fault carried inside a producer reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{}: {message}", .code.as_str())]
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
