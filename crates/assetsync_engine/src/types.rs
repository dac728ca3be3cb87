use crate::cancellable::Outcome;
use crate::import::ImportOutcome;
use crate::upload::UploadOutcome;

/// Stable per target asset.
pub type OperationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Import,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    InInfiniteProgress,
    Success,
    Cancelled,
    Error,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Cancelled | OperationStatus::Error
        )
    }
}

/// Snapshot of a running operation, emitted whenever its phase or progress moves.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationProgress {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// `None` while the operation cannot estimate its progress.
    pub progress: Option<f64>,
    pub description: String,
}

#[derive(Debug)]
pub enum OperationReport {
    Import(ImportOutcome),
    Upload(UploadOutcome),
}

#[derive(Debug)]
pub enum EngineEvent {
    Progress(OperationProgress),
    Finished {
        operation_id: OperationId,
        kind: OperationKind,
        outcome: Outcome<OperationReport>,
    },
    /// The request was refused without starting, e.g. the same operation is still running.
    Rejected {
        operation_id: OperationId,
        kind: OperationKind,
        reason: String,
    },
}
