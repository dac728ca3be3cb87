use std::collections::{BTreeMap, VecDeque};

use engine_logging::engine_debug;

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

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// `None` while indeterminate.
    pub progress: Option<f64>,
    pub description: String,
    /// Survives pruning until explicitly dismissed.
    pub is_sticky: bool,
    pub started_at_ms: u64,
}

impl Operation {
    fn started(id: OperationId, kind: OperationKind, sticky: bool, now_ms: u64) -> Self {
        let description = match kind {
            OperationKind::Import => "Starting import",
            OperationKind::Upload => "Starting upload",
        };
        Self {
            id,
            kind,
            status: OperationStatus::InInfiniteProgress,
            progress: None,
            description: description.to_string(),
            is_sticky: sticky,
            started_at_ms: now_ms,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// What survives a restart for a sticky operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub description: String,
    pub started_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedRequest {
    pub(crate) id: OperationId,
    pub(crate) kind: OperationKind,
    pub(crate) sticky: bool,
    pub(crate) requested_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistryState {
    operations: BTreeMap<OperationId, Operation>,
    queued: VecDeque<QueuedRequest>,
    dirty: bool,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.operations.get(id).is_some_and(Operation::is_running)
    }

    /// Requests waiting for an operation with the same id to finish.
    pub fn queued_count(&self, id: &str) -> usize {
        self.queued.iter().filter(|request| request.id == id).count()
    }

    pub(crate) fn queued_total(&self) -> usize {
        self.queued.len()
    }

    /// Sticky operations, oldest first, for persistence.
    pub fn sticky_snapshot(&self) -> Vec<OperationSnapshot> {
        let mut snapshot: Vec<OperationSnapshot> = self
            .operations
            .values()
            .filter(|op| op.is_sticky)
            .map(|op| OperationSnapshot {
                id: op.id.clone(),
                kind: op.kind,
                status: op.status,
                description: op.description.clone(),
                started_at_ms: op.started_at_ms,
            })
            .collect();
        snapshot.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        snapshot
    }

    pub fn consume_dirty(&mut self) -> bool {
        let was_dirty = self.dirty;
        self.dirty = false;
        was_dirty
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn start(&mut self, id: OperationId, kind: OperationKind, sticky: bool, now_ms: u64) {
        self.operations
            .insert(id.clone(), Operation::started(id, kind, sticky, now_ms));
        self.dirty = true;
    }

    pub(crate) fn enqueue(&mut self, request: QueuedRequest) {
        engine_debug!(
            "operation {} busy, queueing {:?} request",
            request.id,
            request.kind
        );
        self.queued.push_back(request);
        self.dirty = true;
    }

    /// Remove and return the oldest queued request for `id`.
    pub(crate) fn dequeue(&mut self, id: &str) -> Option<QueuedRequest> {
        let position = self.queued.iter().position(|request| request.id == id)?;
        self.dirty = true;
        self.queued.remove(position)
    }

    pub(crate) fn drop_queued(&mut self, id: &str) -> usize {
        let before = self.queued.len();
        self.queued.retain(|request| request.id != id);
        let dropped = before - self.queued.len();
        if dropped > 0 {
            self.dirty = true;
        }
        dropped
    }

    pub(crate) fn apply_progress(
        &mut self,
        id: &str,
        status: OperationStatus,
        progress: Option<f64>,
        description: String,
    ) {
        let Some(op) = self.operations.get_mut(id) else {
            engine_debug!("progress for unknown operation {} ignored", id);
            return;
        };
        if !op.is_running() || status.is_terminal() {
            return;
        }
        op.status = status;
        op.progress = progress.map(|p| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) });
        op.description = description;
        self.dirty = true;
    }

    /// Record a terminal status. Returns the finished operation's kind when it was running.
    pub(crate) fn apply_finished(
        &mut self,
        id: &str,
        status: OperationStatus,
        description: Option<String>,
    ) -> Option<OperationKind> {
        let op = self.operations.get_mut(id)?;
        if !op.is_running() {
            return None;
        }
        op.status = status;
        if status == OperationStatus::Success {
            op.progress = Some(1.0);
        }
        if let Some(description) = description {
            op.description = description;
        }
        let kind = op.kind;
        // Successful imports leave the registry; the files are in the project now.
        if kind == OperationKind::Import && status == OperationStatus::Success {
            self.operations.remove(id);
        }
        self.dirty = true;
        Some(kind)
    }

    pub(crate) fn dismiss(&mut self, id: &str) -> bool {
        if self.is_running(id) {
            return false;
        }
        let removed = self.operations.remove(id).is_some();
        self.dirty |= removed;
        removed
    }

    pub(crate) fn restore(&mut self, snapshot: OperationSnapshot) {
        if self.operations.contains_key(&snapshot.id) {
            return;
        }
        // A run that was in flight when the host stopped did not finish.
        let (status, description) = if snapshot.status.is_terminal() {
            (snapshot.status, snapshot.description)
        } else {
            (
                OperationStatus::Error,
                format!("Interrupted: {}", snapshot.description),
            )
        };
        self.operations.insert(
            snapshot.id.clone(),
            Operation {
                id: snapshot.id,
                kind: snapshot.kind,
                status,
                progress: None,
                description,
                is_sticky: true,
                started_at_ms: snapshot.started_at_ms,
            },
        );
        self.dirty = true;
    }

    pub(crate) fn prune_finished(&mut self) -> usize {
        let before = self.operations.len();
        self.operations
            .retain(|_, op| op.is_running() || op.is_sticky);
        let pruned = before - self.operations.len();
        if pruned > 0 {
            self.dirty = true;
        }
        pruned
    }
}
