#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Host asked for an import or upload of one asset.
    OperationRequested {
        id: crate::OperationId,
        kind: crate::OperationKind,
        sticky: bool,
        now_ms: u64,
    },
    /// Engine progress for a running operation.
    OperationProgress {
        id: crate::OperationId,
        status: crate::OperationStatus,
        progress: Option<f64>,
        description: String,
    },
    /// Engine reached a terminal status for an operation.
    OperationFinished {
        id: crate::OperationId,
        status: crate::OperationStatus,
        /// Replaces the description, e.g. with the failure reason.
        description: Option<String>,
    },
    /// User clicked Cancel on an operation row.
    CancelClicked { id: crate::OperationId },
    /// User dismissed a finished operation.
    DismissClicked { id: crate::OperationId },
    /// Restore sticky operations from persisted state.
    RestoreSticky(Vec<crate::OperationSnapshot>),
    /// Drop finished operations that are not sticky.
    PruneFinished,
}
