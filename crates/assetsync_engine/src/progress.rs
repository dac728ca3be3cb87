use std::future::Future;
use std::sync::mpsc;
use std::time::Duration;

use engine_logging::engine_trace;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::transfer_set::FileTransferSet;
use crate::EngineEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// How often aggregate progress is polled, and how far it must move before it is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPolicy {
    pub cadence: Duration,
    pub min_delta: f64,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            cadence: Duration::from_millis(200),
            min_delta: 0.001,
        }
    }
}

/// Await `work` while polling the aggregate progress of `transfers`.
///
/// Reports go to `report` only when progress advanced by more than
/// `policy.min_delta`. Once cancellation is requested nothing more is
/// reported, but `work` is still awaited so every transfer reaches a terminal
/// state before this returns.
pub async fn drive_with_progress<F, R>(
    work: F,
    transfers: &FileTransferSet,
    policy: &ProgressPolicy,
    token: &CancellationToken,
    mut report: R,
) -> F::Output
where
    F: Future,
    R: FnMut(f64),
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(policy.cadence.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_reported = 0.0;

    loop {
        tokio::select! {
            output = &mut work => {
                if !token.is_cancelled() {
                    report(transfers.aggregate_progress());
                }
                return output;
            }
            _ = ticker.tick() => {
                if token.is_cancelled() {
                    continue;
                }
                let progress = transfers.aggregate_progress();
                if progress - last_reported > policy.min_delta {
                    engine_trace!("aggregate progress {:.3}", progress);
                    report(progress);
                    last_reported = progress;
                }
            }
        }
    }
}
