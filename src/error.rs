//! Error types for the protocol, store, and session layers.

use crate::types::{CellAddress, ColumnId, RowId, SessionId, TableId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-level errors. These are recovered locally: the offending frame is
/// dropped and the stream continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("Frame is not valid JSON: {reason}")]
    FrameParse { reason: String, raw: String },

    #[error("Unexpected event kind: {}", kind.as_deref().unwrap_or("<missing>"))]
    UnexpectedEventKind { kind: Option<String>, raw: String },

    #[error("Frame exceeded {limit} bytes without a delimiter")]
    FrameTooLarge { limit: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidEncoding { raw: String },
}

impl StreamError {
    /// Raw frame text kept for diagnostics, if any.
    pub fn raw(&self) -> Option<&str> {
        match self {
            StreamError::FrameParse { raw, .. }
            | StreamError::UnexpectedEventKind { raw, .. }
            | StreamError::InvalidEncoding { raw } => Some(raw),
            StreamError::FrameTooLarge { .. } => None,
        }
    }

    /// Whether the frame itself could not be decoded. A well-formed event of
    /// an unknown kind is not unparseable.
    pub fn is_unparseable(&self) -> bool {
        !matches!(self, StreamError::UnexpectedEventKind { .. })
    }
}

/// Errors surfaced to callers of the store and session manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("Session conflict: cell {address} is already generating in {active}")]
    SessionConflict {
        address: CellAddress,
        active: SessionId,
    },

    #[error("Cell busy: {0}")]
    CellBusy(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Backend error for cell {address}: {message}")]
    BackendError {
        address: CellAddress,
        message: String,
    },

    #[error("Session {0} was cancelled")]
    Cancelled(SessionId),

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Row not found: {0}")]
    RowNotFound(RowId),

    #[error("Column not found: {0}")]
    ColumnNotFound(ColumnId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ApiError {
    /// Whether opening the transport again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::TransportError(_) => true,
            ApiError::ProviderRequestFailed(_) => true,
            ApiError::ConfigError(_) => false,
            ApiError::ProviderNotConfigured(_) => false,
            ApiError::TemplateError(_) => false,
            ApiError::InvalidRequest(_) => false,
            _ => false,
        }
    }

    /// Kind tag for this error, as stored on cells and reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::SessionConflict { .. } => ErrorKind::SessionConflict,
            ApiError::TransportError(_) | ApiError::ProviderRequestFailed(_) => {
                ErrorKind::TransportError
            }
            ApiError::BackendError { .. } => ErrorKind::BackendError,
            ApiError::Cancelled(_) => ErrorKind::CancellationError,
            _ => ErrorKind::RequestError,
        }
    }
}

/// Error kind attached to a cell or a session report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FrameParseError,
    UnexpectedEventKind,
    SessionConflict,
    TransportError,
    BackendError,
    CancellationError,
    RequestError,
}

/// Error recorded on a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CellError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BackendError,
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ApiError::TransportError(err.to_string())
        } else {
            ApiError::ProviderRequestFailed(err.to_string())
        }
    }
}
