#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Hand the oldest queued request for `id` to the engine.
    StartOperation {
        id: crate::OperationId,
        kind: crate::OperationKind,
    },
    CancelOperation {
        id: crate::OperationId,
    },
}
