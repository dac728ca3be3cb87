use engine_logging::{engine_debug, engine_warn};

use crate::state::QueuedRequest;
use crate::{Effect, Msg, RegistryState};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: RegistryState, msg: Msg) -> (RegistryState, Vec<Effect>) {
    let effects = match msg {
        Msg::OperationRequested {
            id,
            kind,
            sticky,
            now_ms,
        } => {
            // Operations on the same asset never overlap.
            if state.is_running(&id) {
                state.enqueue(QueuedRequest {
                    id,
                    kind,
                    sticky,
                    requested_at_ms: now_ms,
                });
                Vec::new()
            } else {
                state.start(id.clone(), kind, sticky, now_ms);
                vec![Effect::StartOperation { id, kind }]
            }
        }
        Msg::OperationProgress {
            id,
            status,
            progress,
            description,
        } => {
            state.apply_progress(&id, status, progress, description);
            Vec::new()
        }
        Msg::OperationFinished {
            id,
            status,
            description,
        } => {
            if !status.is_terminal() {
                engine_warn!("finish for {} with non-terminal status {:?} ignored", id, status);
                return (state, Vec::new());
            }
            if state.apply_finished(&id, status, description).is_none() {
                engine_debug!("finish for {} without a running operation", id);
            }
            match state.dequeue(&id) {
                Some(next) => {
                    state.start(next.id.clone(), next.kind, next.sticky, next.requested_at_ms);
                    vec![Effect::StartOperation {
                        id: next.id,
                        kind: next.kind,
                    }]
                }
                None => Vec::new(),
            }
        }
        Msg::CancelClicked { id } => {
            let dropped = state.drop_queued(&id);
            if dropped > 0 {
                engine_debug!("dropped {} queued request(s) for {}", dropped, id);
            }
            if state.is_running(&id) {
                vec![Effect::CancelOperation { id }]
            } else {
                Vec::new()
            }
        }
        Msg::DismissClicked { id } => {
            state.dismiss(&id);
            Vec::new()
        }
        Msg::RestoreSticky(snapshots) => {
            for snapshot in snapshots {
                state.restore(snapshot);
            }
            Vec::new()
        }
        Msg::PruneFinished => {
            state.prune_finished();
            Vec::new()
        }
    };

    (state, effects)
}
