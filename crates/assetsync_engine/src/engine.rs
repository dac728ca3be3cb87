use std::collections::HashMap;
use std::io;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join_all;
use tokio::sync::mpsc as command_channel;

use crate::cache::CacheStore;
use crate::cancellable::{CancellableOperation, Outcome, StartError};
use crate::download::Downloader;
use crate::error::EngineError;
use crate::import::{ImportContext, ImportRequest, ImportSettings, ImportTransferOperation};
use crate::preview::PreviewGenerator;
use crate::progress::{ChannelProgressSink, ProgressSink};
use crate::service::AssetService;
use crate::types::{EngineEvent, OperationId, OperationKind, OperationReport};
use crate::upload::{
    UploadBatch, UploadContext, UploadRequest, UploadSettings, UploadTransferOperation,
};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub import: ImportSettings,
    pub upload: UploadSettings,
}

/// Collaborators handed to every operation the engine starts.
#[derive(Clone)]
pub struct EngineServices {
    pub service: Arc<dyn AssetService>,
    pub downloader: Arc<dyn Downloader>,
    pub previews: Arc<dyn PreviewGenerator>,
    pub cache: Option<Arc<CacheStore>>,
}

enum EngineCommand {
    Import(ImportRequest),
    Upload(UploadRequest),
    UploadBatch {
        batch_id: OperationId,
        requests: Vec<UploadRequest>,
    },
    Cancel(OperationId),
    ClearExtraCache,
}

type OperationTable = Arc<Mutex<HashMap<OperationId, CancellableOperation>>>;

struct Worker {
    services: EngineServices,
    config: EngineConfig,
    events: Arc<dyn ProgressSink>,
    event_tx: mpsc::Sender<EngineEvent>,
    operations: OperationTable,
}

/// Runs operations on a dedicated thread hosting a single-threaded runtime.
pub struct EngineHandle {
    cmd_tx: command_channel::UnboundedSender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    pub fn new(services: EngineServices, config: EngineConfig) -> io::Result<Self> {
        let (cmd_tx, mut cmd_rx) = command_channel::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let worker = Arc::new(Worker {
            services,
            config,
            events: Arc::new(ChannelProgressSink::new(event_tx.clone())),
            event_tx,
            operations: Arc::new(Mutex::new(HashMap::new())),
        });

        thread::Builder::new()
            .name("assetsync-engine".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(command) = cmd_rx.recv().await {
                        worker.dispatch(command);
                        // Spawned operations enter their scope before a following cancel is read.
                        tokio::task::yield_now().await;
                    }
                    engine_debug!("engine command channel closed");
                });
            })?;

        Ok(Self { cmd_tx, event_rx })
    }

    pub fn import(&self, request: ImportRequest) {
        self.send(EngineCommand::Import(request));
    }

    pub fn upload(&self, request: UploadRequest) {
        self.send(EngineCommand::Upload(request));
    }

    /// Uploads that reference each other. `batch_id` cancels the preparation
    /// phase; each upload is cancelled through its own operation id.
    pub fn upload_batch(&self, batch_id: impl Into<OperationId>, requests: Vec<UploadRequest>) {
        self.send(EngineCommand::UploadBatch {
            batch_id: batch_id.into(),
            requests,
        });
    }

    pub fn cancel(&self, operation_id: impl Into<OperationId>) {
        self.send(EngineCommand::Cancel(operation_id.into()));
    }

    pub fn clear_extra_cache(&self) {
        self.send(EngineCommand::ClearExtraCache);
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Blocking receive, mostly for hosts without an event loop.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            engine_warn!("engine thread is gone, command dropped");
        }
    }
}

impl Worker {
    fn dispatch(self: &Arc<Self>, command: EngineCommand) {
        match command {
            EngineCommand::Import(request) => {
                let worker = Arc::clone(self);
                tokio::spawn(async move { worker.run_import(request).await });
            }
            EngineCommand::Upload(request) => {
                let worker = Arc::clone(self);
                tokio::spawn(async move { worker.run_upload(request).await });
            }
            EngineCommand::UploadBatch { batch_id, requests } => {
                let worker = Arc::clone(self);
                tokio::spawn(async move { worker.run_batch(batch_id, requests).await });
            }
            EngineCommand::Cancel(operation_id) => {
                let cancelled = self
                    .operations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&operation_id)
                    .is_some_and(CancellableOperation::cancel);
                if cancelled {
                    engine_info!("cancelling {}", operation_id);
                } else {
                    engine_debug!("cancel for {} ignored, nothing running", operation_id);
                }
            }
            EngineCommand::ClearExtraCache => {
                let Some(cache) = self.services.cache.clone() else {
                    engine_debug!("no cache configured, nothing to clear");
                    return;
                };
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(move || cache.clear_extra()).await {
                        Ok(Ok(report)) => engine_info!(
                            "cleared extra cache: {} entries, {} bytes freed",
                            report.evicted.len(),
                            report.freed_bytes
                        ),
                        Ok(Err(err)) => engine_warn!("clearing extra cache failed: {}", err),
                        Err(err) => engine_warn!("cache maintenance task failed: {}", err),
                    }
                });
            }
        }
    }

    fn operation(&self, operation_id: &str) -> CancellableOperation {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation_id.to_string())
            .or_default()
            .clone()
    }

    fn import_context(&self) -> ImportContext {
        ImportContext {
            service: Arc::clone(&self.services.service),
            downloader: Arc::clone(&self.services.downloader),
            cache: self.services.cache.clone(),
            events: Arc::clone(&self.events),
            settings: self.config.import.clone(),
        }
    }

    fn upload_context(&self) -> UploadContext {
        UploadContext {
            service: Arc::clone(&self.services.service),
            previews: Arc::clone(&self.services.previews),
            cache: self.services.cache.clone(),
            events: Arc::clone(&self.events),
            settings: self.config.upload.clone(),
        }
    }

    async fn run_import(&self, request: ImportRequest) {
        let operation_id = request.operation_id.clone();
        let ctx = self.import_context();
        let started = self
            .operation(&operation_id)
            .run(|token| async move {
                let mut operation = ImportTransferOperation::new(ctx, request);
                operation.run(&token).await
            })
            .await;
        let started = started.map(|outcome| outcome.map(OperationReport::Import));
        self.finish(operation_id, OperationKind::Import, started);
    }

    /// A lone upload is a batch of one; preparation runs under its own id.
    async fn run_upload(&self, request: UploadRequest) {
        let operation_id = request.operation_id.clone();
        self.run_batch(operation_id, vec![request]).await;
    }

    async fn run_batch(&self, batch_id: OperationId, requests: Vec<UploadRequest>) {
        let ids: Vec<OperationId> = requests.iter().map(|r| r.operation_id.clone()).collect();
        let batch = UploadBatch::new(self.upload_context(), requests);
        let prepared = self
            .operation(&batch_id)
            .run(|token| async move {
                batch.prepare(&token).await?;
                Ok(batch)
            })
            .await;

        match prepared {
            Ok(Outcome::Success(batch)) => self.run_batch_operations(batch).await,
            Ok(Outcome::Cancelled) => {
                for id in ids {
                    self.emit_finished(id, OperationKind::Upload, Outcome::Cancelled);
                }
            }
            Ok(Outcome::Failed(err)) => {
                engine_warn!("upload batch {} failed to prepare: {}", batch_id, err);
                for id in ids {
                    let failure = EngineError::BatchPreparation(err.to_string());
                    self.emit_finished(id, OperationKind::Upload, Outcome::Failed(failure));
                }
            }
            Err(err) => self.reject(batch_id, OperationKind::Upload, err.to_string()),
        }
    }

    async fn run_batch_operations(&self, batch: UploadBatch) {
        let operations = batch.into_operations();
        join_all(
            operations
                .into_iter()
                .map(|operation| self.run_prepared_upload(operation)),
        )
        .await;
    }

    async fn run_prepared_upload(&self, mut operation: UploadTransferOperation) {
        let operation_id = operation.request().operation_id.clone();
        let started = self
            .operation(&operation_id)
            .run(|token| async move { operation.run(&token).await })
            .await;
        let started = started.map(|outcome| outcome.map(OperationReport::Upload));
        self.finish(operation_id, OperationKind::Upload, started);
    }

    fn finish(
        &self,
        operation_id: OperationId,
        kind: OperationKind,
        started: Result<Outcome<OperationReport>, StartError>,
    ) {
        match started {
            Ok(outcome) => self.emit_finished(operation_id, kind, outcome),
            Err(err) => self.reject(operation_id, kind, err.to_string()),
        }
    }

    fn emit_finished(
        &self,
        operation_id: OperationId,
        kind: OperationKind,
        outcome: Outcome<OperationReport>,
    ) {
        let _ = self.event_tx.send(EngineEvent::Finished {
            operation_id,
            kind,
            outcome,
        });
    }

    fn reject(&self, operation_id: OperationId, kind: OperationKind, reason: String) {
        engine_warn!("{:?} {} rejected: {}", kind, operation_id, reason);
        let _ = self.event_tx.send(EngineEvent::Rejected {
            operation_id,
            kind,
            reason,
        });
    }
}
