use std::fmt;
use std::io;

use thiserror::Error;

use crate::cache::CacheError;
use crate::persist::PersistError;

/// Why a single file transfer failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Io,
    Service,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Io => write!(f, "io error"),
            FailureKind::Service => write!(f, "asset service error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error recorded on one `FileTransfer`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransferError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "transfer cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        Self::new(FailureKind::Io, err.to_string())
    }
}

impl From<ServiceError> for TransferError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Cancelled => Self::cancelled(),
            other => Self::new(FailureKind::Service, other.to_string()),
        }
    }
}

/// Failure reported by the remote asset service collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("request cancelled")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Operation-level failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("asset {asset} has no downloadable files")]
    NothingToImport { asset: String },
    #[error("{failed} of {total} file transfers failed, first: {first}")]
    Transfers {
        failed: usize,
        total: usize,
        first: TransferError,
    },
    #[error("batch asset '{0}' has no remote identifier yet")]
    Unresolved(String),
    #[error("upload batch preparation failed: {0}")]
    BatchPreparation(String),
    #[error("asset service error: {0}")]
    Service(#[from] ServiceError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Cooperative cancellation is a terminal status, never an error to report.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            EngineError::Cancelled | EngineError::Service(ServiceError::Cancelled)
        )
    }
}
