use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Closed error taxonomy for everything the managers surface to callers.
///
/// `kind` and `retryable` are the stable contract; `details` carries
/// free-form diagnostics (blocking PIDs, command context, hints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTransition,
    Conflict,
    BusyDevice,
    DependencyMissing,
    BackendFailed,
    Timeout,
    PermissionDenied,
    Unsupported,
}

impl ErrorKind {
    /// Stable wire code for status payloads and state-store error records.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "E_INVALID_TRANSITION",
            ErrorKind::Conflict => "E_CONFLICT",
            ErrorKind::BusyDevice => "E_BUSY_DEVICE",
            ErrorKind::DependencyMissing => "E_DEP_MISSING",
            ErrorKind::BackendFailed => "E_BACKEND_FAILED",
            ErrorKind::Timeout => "E_TIMEOUT",
            ErrorKind::PermissionDenied => "E_PERMISSION",
            ErrorKind::Unsupported => "E_UNSUPPORTED",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .kind.code())]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub details: Value,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTransition, message, false)
    }

    /// Temporarily not allowed; caller should retry after a short delay.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message, true)
    }

    pub fn busy_device(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusyDevice, message, true)
    }

    pub fn dependency_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyMissing, message, false)
    }

    pub fn backend_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendFailed, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, true)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message, false)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message, false)
    }

    /// Merge extra keys into the detail object, keeping existing ones.
    pub fn merge_details(mut self, extra: Value) -> Self {
        match (&mut self.details, extra) {
            (Value::Object(base), Value::Object(new)) => {
                for (k, v) in new {
                    base.entry(k).or_insert(v);
                }
            }
            (slot, new) if slot.is_null() => *slot = new,
            _ => {}
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
