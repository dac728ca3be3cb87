use std::time::Duration;

use assetsync_engine::{
    drive_with_progress, ByteProgressSink, FailureKind, FileTransfer, FileTransferSet,
    ProgressPolicy, TransferError, TransferSetStatus, TransferSource, UNSTARTED,
};
use tokio_util::sync::CancellationToken;

fn transfer(name: &str) -> FileTransfer {
    FileTransfer::new(
        TransferSource::Url(format!("https://cdn.example.com/{name}")),
        format!("tmp/{name}"),
    )
}

#[test]
fn empty_set_reports_zero() {
    let set = FileTransferSet::new();
    assert_eq!(set.aggregate_progress(), 0.0);
    assert!(set.is_complete());
    assert_eq!(set.status(), TransferSetStatus::Success);
}

#[test]
fn aggregate_is_mean_with_unstarted_counted_as_zero() {
    let mut set = FileTransferSet::new();
    let a = set.add(transfer("a"));
    let b = set.add(transfer("b"));
    let c = set.add(transfer("c"));
    let _d = set.add(transfer("d"));

    assert_eq!(set.aggregate_progress(), 0.0);
    a.report(1.0);
    b.report(0.5);
    c.report(0.5);

    assert_eq!(set.aggregate_progress(), 0.5);
    assert!(!set.is_complete());
}

#[test]
fn progress_values_are_clamped() {
    let t = transfer("a");
    assert_eq!(t.progress(), UNSTARTED);
    t.set_progress(1.7);
    assert_eq!(t.progress(), 1.0);
    t.set_progress(-3.0);
    assert_eq!(t.progress(), 0.0);
    t.set_progress(f64::NAN);
    assert_eq!(t.progress(), 0.0);
}

#[test]
fn any_error_flips_status_once_all_are_terminal() {
    let mut set = FileTransferSet::new();
    let ok = set.add(transfer("ok"));
    let broken = set.add(transfer("broken"));

    ok.complete();
    assert!(!set.is_complete());
    broken.fail(TransferError::new(FailureKind::HttpStatus(500), "server error"));

    assert!(set.is_complete());
    assert_eq!(set.status(), TransferSetStatus::Error);
    let errors = set.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0.to_string_lossy(), "tmp/broken");
    assert_eq!(errors[0].1.kind, FailureKind::HttpStatus(500));
}

#[tokio::test(start_paused = true)]
async fn polling_reports_progress_and_a_final_value() {
    let mut set = FileTransferSet::new();
    let a = set.add(transfer("a"));
    let b = set.add(transfer("b"));
    let token = CancellationToken::new();
    let policy = ProgressPolicy {
        cadence: Duration::from_millis(200),
        min_delta: 0.01,
    };

    let work = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        a.report(0.5);
        tokio::time::sleep(Duration::from_millis(500)).await;
        a.complete();
        b.complete();
        "done"
    };
    let mut reports = Vec::new();
    let output = drive_with_progress(work, &set, &policy, &token, |p| reports.push(p)).await;

    assert_eq!(output, "done");
    assert!(reports.contains(&0.25));
    assert_eq!(reports.last(), Some(&1.0));
    assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    // Unchanged progress is not re-reported on every tick.
    assert!(reports.len() <= 3, "{reports:?}");
}

#[tokio::test(start_paused = true)]
async fn polling_stays_quiet_after_cancellation() {
    let mut set = FileTransferSet::new();
    let a = set.add(transfer("a"));
    let token = CancellationToken::new();

    let work = async {
        token.cancel();
        a.report(0.8);
        tokio::time::sleep(Duration::from_secs(1)).await;
    };
    let mut reports = Vec::new();
    drive_with_progress(work, &set, &ProgressPolicy::default(), &token, |p| reports.push(p)).await;

    assert!(reports.is_empty());
}
