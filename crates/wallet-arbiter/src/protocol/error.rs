//! Errors as they cross the boundary to the dApp

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of error codes a dApp can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInputError,
    InvalidPasswordError,
    OperationCanceledError,
    UnauthorizedSignerError,
    UnknownError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInputError => "InvalidInputError",
            Self::InvalidPasswordError => "InvalidPasswordError",
            Self::OperationCanceledError => "OperationCanceledError",
            Self::UnauthorizedSignerError => "UnauthorizedSignerError",
            Self::UnknownError => "UnknownError",
        };
        f.write_str(name)
    }
}

/// Error object carried in a response message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInputError, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OperationCanceledError, message)
    }

    pub fn unauthorized_signer(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnauthorizedSignerError, message)
    }

    /// Internal failures never leak their detail
    pub fn unknown() -> Self {
        Self::new(ErrorCode::UnknownError, "An unknown error occurred")
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
