use std::sync::Once;

use assetsync_core::{update, Effect, Msg, OperationKind, OperationStatus, RegistryState};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn request(state: RegistryState, id: &str, kind: OperationKind, now_ms: u64) -> (RegistryState, Vec<Effect>) {
    update(
        state,
        Msg::OperationRequested {
            id: id.to_string(),
            kind,
            sticky: true,
            now_ms,
        },
    )
}

fn progress(state: RegistryState, id: &str, value: f64) -> RegistryState {
    update(
        state,
        Msg::OperationProgress {
            id: id.to_string(),
            status: OperationStatus::InProgress,
            progress: Some(value),
            description: format!("Downloading {id}"),
        },
    )
    .0
}

fn finish(state: RegistryState, id: &str, status: OperationStatus) -> (RegistryState, Vec<Effect>) {
    update(
        state,
        Msg::OperationFinished {
            id: id.to_string(),
            status,
            description: None,
        },
    )
}

#[test]
fn request_starts_operation() {
    init_logging();
    let (mut state, effects) = request(RegistryState::new(), "rock", OperationKind::Import, 10);

    assert_eq!(
        effects,
        vec![Effect::StartOperation {
            id: "rock".to_string(),
            kind: OperationKind::Import,
        }]
    );
    let view = state.view();
    assert_eq!(view.running, 1);
    assert_eq!(view.rows[0].status, OperationStatus::InInfiniteProgress);
    assert_eq!(view.rows[0].percent, None);
    assert!(view.rows[0].can_cancel);
    assert!(state.consume_dirty());
    assert!(!state.consume_dirty());
}

#[test]
fn progress_updates_row() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "rock", OperationKind::Import, 10);
    let mut state = progress(state, "rock", 0.426);

    let row = state.view().rows[0].clone();
    assert_eq!(row.status, OperationStatus::InProgress);
    assert_eq!(row.percent, Some(43));
    assert_eq!(row.description, "Downloading rock");
    assert!(state.consume_dirty());

    let state = progress(state, "rock", 7.0);
    assert_eq!(state.view().rows[0].percent, Some(100));
}

#[test]
fn progress_for_unknown_operation_is_ignored() {
    init_logging();
    let mut state = progress(RegistryState::new(), "ghost", 0.5);
    assert!(state.view().rows.is_empty());
    assert!(!state.consume_dirty());
}

#[test]
fn successful_import_leaves_registry() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "rock", OperationKind::Import, 10);
    let (state, effects) = finish(state, "rock", OperationStatus::Success);

    assert!(effects.is_empty());
    assert!(state.operation("rock").is_none());
}

#[test]
fn successful_upload_stays_until_dismissed() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "crate", OperationKind::Upload, 10);
    let (state, _) = finish(state, "crate", OperationStatus::Success);

    let op = state.operation("crate").unwrap();
    assert_eq!(op.status, OperationStatus::Success);
    assert_eq!(op.progress, Some(1.0));

    let (state, _) = update(state, Msg::DismissClicked { id: "crate".into() });
    assert!(state.operation("crate").is_none());
}

#[test]
fn failure_keeps_reason_visible() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "rock", OperationKind::Import, 10);
    let (state, _) = update(
        state,
        Msg::OperationFinished {
            id: "rock".into(),
            status: OperationStatus::Error,
            description: Some("1 of 2 file transfers failed".into()),
        },
    );

    let row = state.view().rows[0].clone();
    assert_eq!(row.status, OperationStatus::Error);
    assert_eq!(row.description, "1 of 2 file transfers failed");
    assert!(row.can_dismiss);
    assert!(!row.can_cancel);
}

#[test]
fn progress_after_finish_is_ignored() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "crate", OperationKind::Upload, 10);
    let (state, _) = finish(state, "crate", OperationStatus::Cancelled);
    let state = progress(state, "crate", 0.9);

    assert_eq!(
        state.operation("crate").unwrap().status,
        OperationStatus::Cancelled
    );
}

#[test]
fn cancel_emits_effect_only_for_running_operations() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "rock", OperationKind::Import, 10);
    let (state, effects) = update(state, Msg::CancelClicked { id: "rock".into() });
    assert_eq!(effects, vec![Effect::CancelOperation { id: "rock".into() }]);

    let (state, _) = finish(state, "rock", OperationStatus::Cancelled);
    let (_, effects) = update(state, Msg::CancelClicked { id: "rock".into() });
    assert!(effects.is_empty());
}

#[test]
fn running_operations_cannot_be_dismissed() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "rock", OperationKind::Import, 10);
    let (state, _) = update(state, Msg::DismissClicked { id: "rock".into() });
    assert!(state.is_running("rock"));
}

#[test]
fn prune_keeps_sticky_and_running_operations() {
    init_logging();
    let state = RegistryState::new();
    let (state, _) = update(
        state,
        Msg::OperationRequested {
            id: "transient".into(),
            kind: OperationKind::Upload,
            sticky: false,
            now_ms: 1,
        },
    );
    let (state, _) = request(state, "sticky", OperationKind::Upload, 2);
    let (state, _) = request(state, "running", OperationKind::Upload, 3);
    let (state, _) = finish(state, "transient", OperationStatus::Error);
    let (state, _) = finish(state, "sticky", OperationStatus::Error);

    let (state, _) = update(state, Msg::PruneFinished);

    let ids: Vec<_> = state.view().rows.into_iter().map(|row| row.id).collect();
    assert_eq!(ids, vec!["sticky", "running"]);
}

#[test]
fn rows_are_ordered_by_start_time() {
    init_logging();
    let (state, _) = request(RegistryState::new(), "b", OperationKind::Import, 5);
    let (state, _) = request(state, "a", OperationKind::Import, 9);
    let (state, _) = request(state, "c", OperationKind::Upload, 1);

    let ids: Vec<_> = state.view().rows.into_iter().map(|row| row.id).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);
}
