//! Wires the pure operation registry to the engine thread.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::path::PathBuf;

use assetsync_core::{
    update, Effect, Msg, OperationId, OperationKind, OperationStatus, RegistryState,
    RegistryViewModel,
};
use assetsync_engine::{
    EngineEvent, EngineHandle, ImportRequest, OperationReport, Outcome, UploadRequest,
};
use engine_logging::{engine_debug, engine_error, engine_info};

use crate::persistence::{load_sticky_operations, save_sticky_operations};

enum Payload {
    Import(ImportRequest),
    Upload(UploadRequest),
}

/// An operation the engine has finished, with its full report.
#[derive(Debug)]
pub struct CompletedOperation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub outcome: Outcome<OperationReport>,
}

pub struct Session {
    state: RegistryState,
    engine: EngineHandle,
    /// Requests accepted by the registry but not yet handed to the engine.
    pending: HashMap<OperationId, VecDeque<Payload>>,
    state_dir: Option<PathBuf>,
}

impl Session {
    /// Restores sticky operations from `state_dir` when one is given.
    pub fn new(engine: EngineHandle, state_dir: Option<PathBuf>) -> Self {
        let mut session = Self {
            state: RegistryState::new(),
            engine,
            pending: HashMap::new(),
            state_dir,
        };
        if let Some(dir) = session.state_dir.clone() {
            let sticky = load_sticky_operations(&dir);
            if !sticky.is_empty() {
                session.dispatch(Msg::RestoreSticky(sticky));
            }
        }
        session
    }

    pub fn request_import(&mut self, request: ImportRequest, sticky: bool) {
        let id = request.operation_id.clone();
        self.request(id, OperationKind::Import, sticky, Payload::Import(request));
    }

    pub fn request_upload(&mut self, request: UploadRequest, sticky: bool) {
        let id = request.operation_id.clone();
        self.request(id, OperationKind::Upload, sticky, Payload::Upload(request));
    }

    fn request(&mut self, id: OperationId, kind: OperationKind, sticky: bool, payload: Payload) {
        self.pending.entry(id.clone()).or_default().push_back(payload);
        self.dispatch(Msg::OperationRequested {
            id,
            kind,
            sticky,
            now_ms: now_ms(),
        });
    }

    /// Cancels the running operation and drops requests queued behind it.
    pub fn cancel(&mut self, id: &str) {
        self.pending.remove(id);
        self.dispatch(Msg::CancelClicked { id: id.to_string() });
    }

    pub fn dismiss(&mut self, id: &str) {
        self.dispatch(Msg::DismissClicked { id: id.to_string() });
    }

    pub fn prune_finished(&mut self) {
        self.dispatch(Msg::PruneFinished);
    }

    pub fn clear_extra_cache(&self) {
        self.engine.clear_extra_cache();
    }

    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    pub fn view(&self) -> RegistryViewModel {
        self.state.view()
    }

    /// Drains engine events into the registry and returns the operations that finished.
    pub fn pump(&mut self) -> Vec<CompletedOperation> {
        let mut completed = Vec::new();
        while let Some(event) = self.engine.try_recv() {
            if let Some(done) = self.handle_event(event) {
                completed.push(done);
            }
        }
        completed
    }

    /// Like `pump`, but blocks up to `timeout` for the first event.
    pub fn pump_timeout(&mut self, timeout: std::time::Duration) -> Vec<CompletedOperation> {
        let mut completed = Vec::new();
        if let Some(event) = self.engine.recv_timeout(timeout) {
            completed.extend(self.handle_event(event));
        }
        completed.extend(self.pump());
        completed
    }

    /// Saves sticky operations if anything changed since the last call.
    /// Returns whether the registry was dirty.
    pub fn persist_if_dirty(&mut self) -> bool {
        if !self.state.consume_dirty() {
            return false;
        }
        if let Some(dir) = &self.state_dir {
            save_sticky_operations(dir, &self.state.sticky_snapshot());
        }
        true
    }

    fn handle_event(&mut self, event: EngineEvent) -> Option<CompletedOperation> {
        match event {
            EngineEvent::Progress(progress) => {
                self.dispatch(Msg::OperationProgress {
                    id: progress.operation_id,
                    status: map_status(progress.status),
                    progress: progress.progress,
                    description: progress.description,
                });
                None
            }
            EngineEvent::Finished {
                operation_id,
                kind,
                outcome,
            } => {
                engine_info!("{:?} {} finished: {:?}", kind, operation_id, outcome.status());
                self.dispatch(Msg::OperationFinished {
                    id: operation_id.clone(),
                    status: map_status(outcome.status()),
                    description: Some(describe(&outcome)),
                });
                Some(CompletedOperation {
                    operation_id,
                    kind: map_kind(kind),
                    outcome,
                })
            }
            EngineEvent::Rejected {
                operation_id,
                reason,
                ..
            } => {
                engine_error!("engine rejected {}: {}", operation_id, reason);
                self.dispatch(Msg::OperationFinished {
                    id: operation_id,
                    status: OperationStatus::Error,
                    description: Some(reason),
                });
                None
            }
        }
    }

    fn dispatch(&mut self, msg: Msg) {
        let mut inbox = VecDeque::from([msg]);
        while let Some(msg) = inbox.pop_front() {
            let state = mem::take(&mut self.state);
            let (next, effects) = update(state, msg);
            self.state = next;
            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect) {
                    inbox.push_back(follow_up);
                }
            }
        }
    }

    fn run_effect(&mut self, effect: Effect) -> Option<Msg> {
        match effect {
            Effect::StartOperation { id, kind } => {
                let payload = self.pending.get_mut(&id).and_then(VecDeque::pop_front);
                if self.pending.get(&id).is_some_and(VecDeque::is_empty) {
                    self.pending.remove(&id);
                }
                match payload {
                    Some(Payload::Import(request)) => self.engine.import(request),
                    Some(Payload::Upload(request)) => self.engine.upload(request),
                    None => {
                        engine_error!("no pending {:?} request for {}", kind, id);
                        return Some(Msg::OperationFinished {
                            id,
                            status: OperationStatus::Error,
                            description: Some("Request payload missing".to_string()),
                        });
                    }
                }
                engine_debug!("dispatched {:?} {} to engine", kind, id);
                None
            }
            Effect::CancelOperation { id } => {
                self.engine.cancel(id);
                None
            }
        }
    }
}

fn describe(outcome: &Outcome<OperationReport>) -> String {
    match outcome {
        Outcome::Success(OperationReport::Import(report)) => {
            format!("Imported {} file(s)", report.files.len())
        }
        Outcome::Success(OperationReport::Upload(report)) => {
            let mut text = format!("Uploaded {} file(s)", report.uploaded.len());
            for warning in &report.warnings {
                text.push_str("; ");
                text.push_str(&warning.to_string());
            }
            text
        }
        Outcome::Cancelled => "Cancelled".to_string(),
        Outcome::Failed(err) => err.to_string(),
    }
}

fn map_status(status: assetsync_engine::OperationStatus) -> OperationStatus {
    use assetsync_engine::OperationStatus as Engine;
    match status {
        Engine::InProgress => OperationStatus::InProgress,
        Engine::InInfiniteProgress => OperationStatus::InInfiniteProgress,
        Engine::Success => OperationStatus::Success,
        Engine::Cancelled => OperationStatus::Cancelled,
        Engine::Error => OperationStatus::Error,
    }
}

fn map_kind(kind: assetsync_engine::OperationKind) -> OperationKind {
    match kind {
        assetsync_engine::OperationKind::Import => OperationKind::Import,
        assetsync_engine::OperationKind::Upload => OperationKind::Upload,
    }
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
