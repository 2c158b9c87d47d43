//! Typed error kind carried as data, not as a class hierarchy — the wire
//! uses the `kind` string directly (see `spec.md` §7, §9 "Typed errors with
//! kind tag").

use serde::Serialize;
use thiserror::Error;

/// The taxonomy the engine reasons about internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    RateLimited,
    ServerError,
    Cancelled,
    Timeout,
    ToolExecution,
}

impl ErrorKind {
    /// The wire-visible error type string (`spec.md` §6 error taxonomy).
    /// `Cancelled` and `ToolExecution` never reach the wire as an `error`
    /// object (cancellation is a terminal *status*, tool failures become
    /// `function_call_output` items) but are given a safe fallback so a
    /// caller mapping defensively never panics.
    pub fn wire_type(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "too_many_requests",
            ErrorKind::ServerError | ErrorKind::Cancelled | ErrorKind::ToolExecution => {
                "server_error"
            }
            ErrorKind::Timeout => "server_error",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::ServerError | ErrorKind::Cancelled | ErrorKind::ToolExecution => 500,
            ErrorKind::Timeout => 500,
        }
    }
}

/// A typed gateway error: `{kind, param?, message, cause?}`.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub param: Option<String>,
    pub cause: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            param: None,
            cause: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_cause("timeout")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }
}
