use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TransferError;

/// Progress value of a transfer that has not started yet.
pub const UNSTARTED: f64 = -1.0;

/// Receives the fraction of bytes moved so far by one transfer.
pub trait ByteProgressSink: Send + Sync {
    fn report(&self, fraction: f64);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    Url(String),
    Path(PathBuf),
}

#[derive(Debug)]
struct TransferState {
    progress_bits: AtomicU64,
    error: Mutex<Option<TransferError>>,
}

/// One file within an operation.
///
/// Clones share state: the running transfer writes through one clone while
/// the progress poll reads through another.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    source: TransferSource,
    destination: PathBuf,
    state: Arc<TransferState>,
}

impl FileTransfer {
    pub fn new(source: TransferSource, destination: impl Into<PathBuf>) -> Self {
        Self {
            source,
            destination: destination.into(),
            state: Arc::new(TransferState {
                progress_bits: AtomicU64::new(UNSTARTED.to_bits()),
                error: Mutex::new(None),
            }),
        }
    }

    pub fn source(&self) -> &TransferSource {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Byte progress in `[0, 1]`, or `UNSTARTED`.
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.state.progress_bits.load(Ordering::Acquire))
    }

    pub fn set_progress(&self, fraction: f64) {
        let clamped = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.state
            .progress_bits
            .store(clamped.to_bits(), Ordering::Release);
    }

    pub fn complete(&self) {
        self.set_progress(1.0);
    }

    pub fn fail(&self, error: TransferError) {
        *self
            .state
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn error(&self) -> Option<TransferError> {
        self.state
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.progress() >= 1.0 || self.error().is_some()
    }
}

impl ByteProgressSink for FileTransfer {
    fn report(&self, fraction: f64) {
        self.set_progress(fraction);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSetStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct FileTransferSet {
    transfers: Vec<FileTransfer>,
}

impl FileTransferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transfer and return a handle sharing its state.
    pub fn add(&mut self, transfer: FileTransfer) -> FileTransfer {
        self.transfers.push(transfer.clone());
        transfer
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileTransfer> {
        self.transfers.iter()
    }

    /// Mean byte progress, counting unstarted transfers as zero. Empty sets report zero.
    pub fn aggregate_progress(&self) -> f64 {
        if self.transfers.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .transfers
            .iter()
            .map(|transfer| transfer.progress().max(0.0))
            .sum();
        sum / self.transfers.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.transfers.iter().all(FileTransfer::is_terminal)
    }

    pub fn status(&self) -> TransferSetStatus {
        if self.transfers.iter().any(|t| t.error().is_some()) {
            TransferSetStatus::Error
        } else {
            TransferSetStatus::Success
        }
    }

    pub fn errors(&self) -> Vec<(PathBuf, TransferError)> {
        self.transfers
            .iter()
            .filter_map(|t| t.error().map(|err| (t.destination.clone(), err)))
            .collect()
    }
}
