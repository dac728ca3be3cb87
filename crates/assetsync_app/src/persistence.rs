use std::fs;
use std::path::{Path, PathBuf};

use assetsync_core::{OperationKind, OperationSnapshot, OperationStatus};
use assetsync_engine::{ensure_dir, AtomicFileWriter};
use engine_logging::{engine_error, engine_info, engine_warn};
use serde::{Deserialize, Serialize};

pub const STATE_FILENAME: &str = ".assetsync_state.ron";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum PersistedKind {
    Import,
    Upload,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum PersistedStatus {
    InProgress,
    InInfiniteProgress,
    Success,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedOperation {
    id: String,
    kind: PersistedKind,
    status: PersistedStatus,
    description: String,
    started_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    sticky: Vec<PersistedOperation>,
}

impl From<&OperationSnapshot> for PersistedOperation {
    fn from(snapshot: &OperationSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            kind: match snapshot.kind {
                OperationKind::Import => PersistedKind::Import,
                OperationKind::Upload => PersistedKind::Upload,
            },
            status: match snapshot.status {
                OperationStatus::InProgress => PersistedStatus::InProgress,
                OperationStatus::InInfiniteProgress => PersistedStatus::InInfiniteProgress,
                OperationStatus::Success => PersistedStatus::Success,
                OperationStatus::Cancelled => PersistedStatus::Cancelled,
                OperationStatus::Error => PersistedStatus::Error,
            },
            description: snapshot.description.clone(),
            started_at_ms: snapshot.started_at_ms,
        }
    }
}

impl From<PersistedOperation> for OperationSnapshot {
    fn from(op: PersistedOperation) -> Self {
        Self {
            id: op.id,
            kind: match op.kind {
                PersistedKind::Import => OperationKind::Import,
                PersistedKind::Upload => OperationKind::Upload,
            },
            status: match op.status {
                PersistedStatus::InProgress => OperationStatus::InProgress,
                PersistedStatus::InInfiniteProgress => OperationStatus::InInfiniteProgress,
                PersistedStatus::Success => OperationStatus::Success,
                PersistedStatus::Cancelled => OperationStatus::Cancelled,
                PersistedStatus::Error => OperationStatus::Error,
            },
            description: op.description,
            started_at_ms: op.started_at_ms,
        }
    }
}

pub fn load_sticky_operations(state_dir: &Path) -> Vec<OperationSnapshot> {
    let path = state_dir.join(STATE_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Vec::new();
        }
        Err(err) => {
            engine_warn!("Failed to read persisted state from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let state: PersistedState = match ron::from_str(&content) {
        Ok(state) => state,
        Err(err) => {
            engine_warn!("Failed to parse persisted state from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let sticky: Vec<OperationSnapshot> = state.sticky.into_iter().map(Into::into).collect();
    engine_info!(
        "Loaded {} sticky operation(s) from {:?}",
        sticky.len(),
        path
    );
    sticky
}

pub fn save_sticky_operations(state_dir: &Path, sticky: &[OperationSnapshot]) {
    if let Err(err) = ensure_dir(state_dir) {
        engine_error!("Failed to ensure state dir {:?}: {}", state_dir, err);
        return;
    }

    let state = PersistedState {
        sticky: sticky.iter().map(PersistedOperation::from).collect(),
    };

    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(&state, pretty) {
        Ok(text) => text,
        Err(err) => {
            engine_error!("Failed to serialize persisted state: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(PathBuf::from(state_dir));
    if let Err(err) = writer.write(STATE_FILENAME, content.as_bytes()) {
        engine_error!(
            "Failed to write persisted state to {:?}: {}",
            state_dir,
            err
        );
    }
}
