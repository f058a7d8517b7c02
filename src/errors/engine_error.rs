use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::transport_error::{TransportError, TransportErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownOperation,
    Auth,
    RateLimitTimeout,
    Transport,
    Http,
    Timeout,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimitTimeout => "rate_limit_timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Http => "http",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter that failed its contract. Validation is fail-fast, so this
/// always names exactly one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub param: String,
    pub message: Option<String>,
}

impl ValidationError {
    pub fn missing(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: None,
        }
    }

    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            None => write!(f, "{} is required", self.param),
            Some(message) => write!(f, "{}: {}", self.param, message),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("unknown action '{action}'{hint}")]
    UnknownAction { action: String, hint: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limit wait of {wait_ms}ms exceeds the remaining time budget")]
    RateLimitTimeout { wait_ms: u64 },

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{connector} API error {status}: {body}")]
    Http {
        connector: String,
        status: u16,
        body: String,
    },

    #[error("total timeout of {0}ms exceeded")]
    Timeout(u64),

    #[error("invalid connector configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::UnknownOperation(_) | EngineError::UnknownAction { .. } => {
                ErrorKind::UnknownOperation
            }
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::RateLimitTimeout { .. } => ErrorKind::RateLimitTimeout,
            EngineError::Transport(_) => ErrorKind::Transport,
            EngineError::Http { .. } => ErrorKind::Http,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the failure happened after a request was handed to the
    /// transport. Validation, auth, config and rate-limit failures are local.
    pub fn reached_network(&self) -> bool {
        matches!(
            self,
            EngineError::Transport(_) | EngineError::Http { .. } | EngineError::Timeout(_)
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            EngineError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            EngineError::Transport(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// Faults inside the response cache. These are logged and the call falls
/// through to the network; they never reach the caller.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache store lock poisoned")]
    Poisoned,
    #[error("cache key template produced an empty key")]
    EmptyKey,
}
