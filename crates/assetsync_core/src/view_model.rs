use crate::{OperationId, OperationKind, OperationStatus, RegistryState};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistryViewModel {
    pub rows: Vec<OperationRowView>,
    pub running: usize,
    pub queued: usize,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationRowView {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Whole percent, `None` while indeterminate.
    pub percent: Option<u8>,
    pub description: String,
    pub is_sticky: bool,
    pub can_cancel: bool,
    pub can_dismiss: bool,
}

impl RegistryState {
    /// Rows ordered by start time, oldest first.
    pub fn view(&self) -> RegistryViewModel {
        let mut operations: Vec<_> = self.operations().collect();
        operations.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        let rows: Vec<OperationRowView> = operations
            .into_iter()
            .map(|op| OperationRowView {
                id: op.id.clone(),
                kind: op.kind,
                status: op.status,
                percent: op.progress.map(|p| (p * 100.0).round().clamp(0.0, 100.0) as u8),
                description: op.description.clone(),
                is_sticky: op.is_sticky,
                can_cancel: op.is_running(),
                can_dismiss: !op.is_running(),
            })
            .collect();

        RegistryViewModel {
            running: rows.iter().filter(|row| row.can_cancel).count(),
            queued: self.queued_total(),
            rows,
            dirty: self.is_dirty(),
        }
    }
}
