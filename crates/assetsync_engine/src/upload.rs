//! Upload: publish local files as a new version of a remote asset.
//!
//! `Created -> PreparingManifest -> UpdatingDependencies -> UploadingFiles ->
//! FinalizingMetadata -> TransitioningStatus -> Freezing -> {Success | Error | Cancelled}`
//!
//! Status transition and freeze failures do not fail the upload; they are
//! returned as warnings next to the uploaded content.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::cache::{cache_key, CacheStore};
use crate::cancellable::ensure_not_cancelled;
use crate::error::{EngineError, ServiceError, TransferError};
use crate::persist::AtomicFileWriter;
use crate::preview::{extension_of, GeneratedPreview, PreviewGenerator};
use crate::progress::{drive_with_progress, ProgressPolicy, ProgressSink};
use crate::service::{AssetDraft, AssetRef, AssetService, MetadataUpdate, UploadStream, UploadedFile};
use crate::status::StatusFlow;
use crate::transfer_set::{ByteProgressSink, FileTransfer, FileTransferSet, TransferSource};
use crate::types::{EngineEvent, OperationId, OperationKind, OperationProgress, OperationStatus};

/// Reference from the uploaded asset to another asset version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyEdge {
    /// An asset version that already exists remotely.
    Cloud(AssetRef),
    /// Another asset of the same upload batch, by batch key.
    LocalBatch(String),
}

/// Remote identifiers assigned to the assets of one upload batch.
#[derive(Debug, Default)]
pub struct BatchIdentifiers {
    assigned: Mutex<HashMap<String, AssetRef>>,
}

impl BatchIdentifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, batch_key: impl Into<String>, asset: AssetRef) {
        self.assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(batch_key.into(), asset);
    }

    pub fn get(&self, batch_key: &str) -> Option<AssetRef> {
        self.assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(batch_key)
            .cloned()
    }

    /// Never waits: an unassigned batch key fails immediately.
    pub fn resolve(&self, edge: &DependencyEdge) -> Result<AssetRef, EngineError> {
        match edge {
            DependencyEdge::Cloud(asset) => Ok(asset.clone()),
            DependencyEdge::LocalBatch(key) => self
                .get(key)
                .ok_or_else(|| EngineError::Unresolved(key.clone())),
        }
    }
}

pub fn resolve_dependencies(
    edges: &[DependencyEdge],
    identifiers: &BatchIdentifiers,
) -> Result<BTreeSet<AssetRef>, EngineError> {
    edges.iter().map(|edge| identifiers.resolve(edge)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyDiff {
    pub added: BTreeSet<AssetRef>,
    pub removed: BTreeSet<AssetRef>,
}

impl DependencyDiff {
    pub fn between(desired: &BTreeSet<AssetRef>, existing: &BTreeSet<AssetRef>) -> Self {
        Self {
            added: desired.difference(existing).cloned().collect(),
            removed: existing.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub source: PathBuf,
    /// Path of the file inside the remote asset.
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub operation_id: OperationId,
    pub batch_key: String,
    pub name: String,
    /// `None` for assets that are created when the batch is prepared.
    pub target: Option<AssetRef>,
    pub files: Vec<LocalFile>,
    pub removed_files: Vec<String>,
    pub dependencies: Vec<DependencyEdge>,
    pub preview_file: Option<String>,
    pub current_status: Option<String>,
    pub target_status: Option<String>,
    pub status_flow: Option<StatusFlow>,
    pub freeze: bool,
}

impl UploadRequest {
    pub fn new(batch_key: impl Into<String>, name: impl Into<String>) -> Self {
        let batch_key = batch_key.into();
        Self {
            operation_id: batch_key.clone(),
            batch_key,
            name: name.into(),
            target: None,
            files: Vec::new(),
            removed_files: Vec::new(),
            dependencies: Vec::new(),
            preview_file: None,
            current_status: None,
            target_status: None,
            status_flow: None,
            freeze: false,
        }
    }

    pub fn with_target(mut self, target: AssetRef) -> Self {
        self.operation_id = target.asset_id.clone();
        self.target = Some(target);
        self
    }

    pub fn with_file(mut self, source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        self.files.push(LocalFile {
            source: source.into(),
            destination: destination.into(),
        });
        self
    }

    pub fn with_removed_file(mut self, path: impl Into<String>) -> Self {
        self.removed_files.push(path.into());
        self
    }

    pub fn with_dependency(mut self, edge: DependencyEdge) -> Self {
        self.dependencies.push(edge);
        self
    }

    pub fn with_status(
        mut self,
        flow: StatusFlow,
        current: Option<String>,
        target: impl Into<String>,
    ) -> Self {
        self.status_flow = Some(flow);
        self.current_status = current;
        self.target_status = Some(target.into());
        self
    }

    pub fn with_freeze(mut self) -> Self {
        self.freeze = true;
        self
    }

    pub fn has_file_changes(&self) -> bool {
        !self.files.is_empty() || !self.removed_files.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Scratch space for generated thumbnails when no cache is configured.
    pub temp_dir: PathBuf,
    pub progress: ProgressPolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("assetsync").join("uploads"),
            progress: ProgressPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct UploadContext {
    pub service: Arc<dyn AssetService>,
    pub previews: Arc<dyn PreviewGenerator>,
    pub cache: Option<Arc<CacheStore>>,
    pub events: Arc<dyn ProgressSink>,
    pub settings: UploadSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Created,
    PreparingManifest,
    UpdatingDependencies,
    UploadingFiles,
    FinalizingMetadata,
    TransitioningStatus,
    Freezing,
    Success,
    Error,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Success | UploadState::Error | UploadState::Cancelled
        )
    }

    fn description(self) -> &'static str {
        match self {
            UploadState::Created => "Waiting to upload",
            UploadState::PreparingManifest => "Preparing",
            UploadState::UpdatingDependencies => "Updating dependencies of",
            UploadState::UploadingFiles => "Uploading files of",
            UploadState::FinalizingMetadata => "Updating metadata of",
            UploadState::TransitioningStatus => "Updating status of",
            UploadState::Freezing => "Freezing",
            UploadState::Success => "Uploaded",
            UploadState::Error => "Failed to upload",
            UploadState::Cancelled => "Cancelled upload of",
        }
    }
}

/// A phase that failed without failing the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadWarning {
    Thumbnail(String),
    StatusTransition(String),
    Freeze(String),
}

impl fmt::Display for UploadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadWarning::Thumbnail(message) => write!(f, "thumbnail: {message}"),
            UploadWarning::StatusTransition(message) => write!(f, "status: {message}"),
            UploadWarning::Freeze(message) => write!(f, "freeze: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub asset: AssetRef,
    pub uploaded: Vec<UploadedFile>,
    pub removed_files: usize,
    pub dependencies: BTreeSet<AssetRef>,
    pub preview_file: Option<String>,
    pub status: Option<String>,
    pub frozen: bool,
    pub warnings: Vec<UploadWarning>,
}

pub struct UploadTransferOperation {
    ctx: UploadContext,
    request: UploadRequest,
    identifiers: Arc<BatchIdentifiers>,
    state: UploadState,
}

impl UploadTransferOperation {
    pub fn new(
        ctx: UploadContext,
        request: UploadRequest,
        identifiers: Arc<BatchIdentifiers>,
    ) -> Self {
        Self {
            ctx,
            request,
            identifiers,
            state: UploadState::Created,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    pub async fn run(&mut self, token: &CancellationToken) -> Result<UploadOutcome, EngineError> {
        engine_info!(
            "upload {} ({}) started",
            self.request.operation_id,
            self.request.name
        );
        let result = match self.execute(token).await {
            Err(err) if !err.is_cancelled() && token.is_cancelled() => Err(EngineError::Cancelled),
            other => other,
        };

        let terminal = match &result {
            Ok(_) => UploadState::Success,
            Err(err) if err.is_cancelled() => UploadState::Cancelled,
            Err(_) => UploadState::Error,
        };
        self.transition(terminal, None);

        match &result {
            Ok(outcome) => engine_info!(
                "upload {} finished: {} file(s), {} warning(s)",
                self.request.operation_id,
                outcome.uploaded.len(),
                outcome.warnings.len()
            ),
            Err(err) if err.is_cancelled() => {
                engine_info!("upload {} cancelled", self.request.operation_id)
            }
            Err(err) => engine_warn!("upload {} failed: {}", self.request.operation_id, err),
        }
        result
    }

    async fn execute(&mut self, token: &CancellationToken) -> Result<UploadOutcome, EngineError> {
        let target = match &self.request.target {
            Some(target) => target.clone(),
            None => self
                .identifiers
                .get(&self.request.batch_key)
                .ok_or_else(|| EngineError::Unresolved(self.request.batch_key.clone()))?,
        };
        let mut outcome = UploadOutcome {
            asset: target.clone(),
            uploaded: Vec::new(),
            removed_files: 0,
            dependencies: BTreeSet::new(),
            preview_file: self.request.preview_file.clone(),
            status: self.request.current_status.clone(),
            frozen: false,
            warnings: Vec::new(),
        };

        self.enter(UploadState::PreparingManifest, None, token)?;
        let desired = resolve_dependencies(&self.request.dependencies, &self.identifiers)?;
        let existing = self.ctx.service.get_dependencies(&target, token).await?;

        self.enter(UploadState::UpdatingDependencies, None, token)?;
        let diff = DependencyDiff::between(&desired, &existing);
        if diff.is_empty() {
            engine_debug!("upload {}: dependencies unchanged", self.request.operation_id);
        } else {
            engine_info!(
                "upload {}: {} dependency(ies) added, {} removed",
                self.request.operation_id,
                diff.added.len(),
                diff.removed.len()
            );
            self.ctx
                .service
                .update_dependencies(&target, &desired, &existing, token)
                .await?;
        }
        outcome.dependencies = desired;

        let mut tags = Vec::new();
        if self.request.has_file_changes() {
            self.enter(UploadState::UploadingFiles, Some(0.0), token)?;
            tags = self
                .upload_thumbnail_if_needed(&target, token, &mut outcome.warnings)
                .await?;

            if !self.request.removed_files.is_empty() {
                self.ctx
                    .service
                    .remove_files(&target, &self.request.removed_files, token)
                    .await?;
                outcome.removed_files = self.request.removed_files.len();
            }

            outcome.uploaded = self.upload_files(&target, token).await?;
            if outcome.preview_file.is_none() {
                outcome.preview_file = self.pick_preview(&outcome.uploaded);
            }
        } else {
            engine_debug!("upload {}: no file changes", self.request.operation_id);
        }

        self.enter(UploadState::FinalizingMetadata, None, token)?;
        if outcome.preview_file.is_some() || !tags.is_empty() {
            let update = MetadataUpdate {
                preview_file: outcome.preview_file.clone(),
                tags,
            };
            self.ctx
                .service
                .update_metadata(&target, &update, token)
                .await?;
        }

        if let Some(desired_status) = self.request.target_status.clone() {
            self.enter(UploadState::TransitioningStatus, None, token)?;
            self.transition_status(&target, &desired_status, token, &mut outcome)
                .await?;
        }

        if self.request.freeze {
            self.enter(UploadState::Freezing, None, token)?;
            match self.ctx.service.freeze(&target, token).await {
                Ok(()) => outcome.frozen = true,
                Err(ServiceError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    engine_warn!(
                        "upload {}: freeze failed, version stays mutable: {}",
                        self.request.operation_id,
                        err
                    );
                    outcome.warnings.push(UploadWarning::Freeze(err.to_string()));
                }
            }
        }

        Ok(outcome)
    }

    /// Apply every intermediate status on the shortest path, one at a time.
    async fn transition_status(
        &self,
        target: &AssetRef,
        desired: &str,
        token: &CancellationToken,
        outcome: &mut UploadOutcome,
    ) -> Result<(), EngineError> {
        let Some(flow) = self.request.status_flow.as_ref() else {
            self.warn_status(outcome, format!("no status flow to reach '{desired}'"));
            return Ok(());
        };
        let current = self
            .request
            .current_status
            .clone()
            .unwrap_or_else(|| flow.default_status().to_string());
        if current == desired {
            engine_debug!("upload {}: already in status '{}'", self.request.operation_id, desired);
            return Ok(());
        }

        let Some(path) = self
            .ctx
            .service
            .status_transition_path(flow, &current, desired)
        else {
            self.warn_status(
                outcome,
                format!("no valid transition from '{current}' to '{desired}'"),
            );
            return Ok(());
        };

        for status in path {
            ensure_not_cancelled(token)?;
            match self.ctx.service.update_status(target, &status, token).await {
                Ok(()) => outcome.status = Some(status),
                Err(ServiceError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    self.warn_status(outcome, format!("failed to set status '{status}': {err}"));
                    break;
                }
            }
        }
        Ok(())
    }

    fn warn_status(&self, outcome: &mut UploadOutcome, message: String) {
        engine_warn!("upload {}: {}", self.request.operation_id, message);
        outcome.warnings.push(UploadWarning::StatusTransition(message));
    }

    /// Generate and upload a thumbnail when no file is a natively previewable format.
    ///
    /// Returns the tags contributed by preview generation.
    async fn upload_thumbnail_if_needed(
        &self,
        target: &AssetRef,
        token: &CancellationToken,
        warnings: &mut Vec<UploadWarning>,
    ) -> Result<Vec<String>, EngineError> {
        if self.request.files.is_empty() {
            return Ok(Vec::new());
        }
        let previews = &self.ctx.previews;
        let has_native = self
            .request
            .files
            .iter()
            .filter_map(|file| extension_of(&file.destination))
            .any(|ext| previews.supports_native_preview(&ext));
        if has_native {
            return Ok(Vec::new());
        }

        let sources: Vec<PathBuf> = self.request.files.iter().map(|f| f.source.clone()).collect();
        let generated = match previews.generate(&sources, token).await {
            Ok(Some(generated)) => generated,
            Ok(None) => return Ok(Vec::new()),
            Err(ServiceError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                engine_warn!(
                    "upload {}: thumbnail generation failed: {}",
                    self.request.operation_id,
                    err
                );
                warnings.push(UploadWarning::Thumbnail(err.to_string()));
                return Ok(Vec::new());
            }
        };

        match self.store_and_upload_thumbnail(target, &generated, token).await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                engine_warn!(
                    "upload {}: thumbnail upload failed: {}",
                    self.request.operation_id,
                    err
                );
                warnings.push(UploadWarning::Thumbnail(err.to_string()));
            }
        }
        Ok(generated.tags)
    }

    async fn store_and_upload_thumbnail(
        &self,
        target: &AssetRef,
        generated: &GeneratedPreview,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        if let Some(cache) = &self.ctx.cache {
            let key = cache_key(&format!("thumbnail/{}/{}", target.asset_id, target.version));
            let _pin = cache.pin(&key);
            let path = cache.put_bytes(&key, &generated.content)?;
            self.ctx
                .service
                .upload_thumbnail(target, &path, token)
                .await?;
            return Ok(());
        }

        let writer = AtomicFileWriter::new(self.ctx.settings.temp_dir.clone());
        let filename = format!("thumbnail-{}.png", cache_key(&self.request.operation_id));
        let path = writer.write(&filename, &generated.content)?;
        let uploaded = self
            .ctx
            .service
            .upload_thumbnail(target, &path, token)
            .await;
        let _ = std::fs::remove_file(&path);
        uploaded?;
        Ok(())
    }

    async fn upload_files(
        &self,
        target: &AssetRef,
        token: &CancellationToken,
    ) -> Result<Vec<UploadedFile>, EngineError> {
        let mut transfers = FileTransferSet::new();
        let handles: Vec<FileTransfer> = self
            .request
            .files
            .iter()
            .map(|file| {
                transfers.add(FileTransfer::new(
                    TransferSource::Path(file.source.clone()),
                    PathBuf::from(&file.destination),
                ))
            })
            .collect();

        let work = join_all(
            self.request
                .files
                .iter()
                .zip(handles.iter())
                .map(|(file, transfer)| self.upload_one(target, file, transfer, token)),
        );
        let results = drive_with_progress(
            work,
            &transfers,
            &self.ctx.settings.progress,
            token,
            |progress| self.emit(UploadState::UploadingFiles, Some(progress)),
        )
        .await;
        ensure_not_cancelled(token)?;

        let errors = transfers.errors();
        if let Some((_, first)) = errors.first() {
            return Err(EngineError::Transfers {
                failed: errors.len(),
                total: transfers.len(),
                first: first.clone(),
            });
        }
        Ok(results.into_iter().flatten().collect())
    }

    async fn upload_one(
        &self,
        target: &AssetRef,
        file: &LocalFile,
        transfer: &FileTransfer,
        token: &CancellationToken,
    ) -> Option<UploadedFile> {
        let result = if token.is_cancelled() {
            Err(TransferError::cancelled())
        } else {
            self.stream_file(target, file, transfer, token).await
        };
        match result {
            Ok(uploaded) => {
                transfer.complete();
                Some(uploaded)
            }
            Err(err) => {
                if !err.is_cancelled() {
                    engine_warn!(
                        "upload {}: {} failed: {}",
                        self.request.operation_id,
                        file.destination,
                        err
                    );
                }
                transfer.fail(err);
                None
            }
        }
    }

    async fn stream_file(
        &self,
        target: &AssetRef,
        file: &LocalFile,
        transfer: &FileTransfer,
        token: &CancellationToken,
    ) -> Result<UploadedFile, TransferError> {
        let handle = tokio::fs::File::open(&file.source).await?;
        let length = handle.metadata().await?.len();
        transfer.report(0.0);
        let content = UploadStream {
            reader: Box::new(handle),
            length,
        };
        let uploaded = self
            .ctx
            .service
            .upload_file(target, &file.destination, content, transfer, token)
            .await?;
        Ok(uploaded)
    }

    /// First uploaded file, in request order, whose format can act as the preview.
    fn pick_preview(&self, uploaded: &[UploadedFile]) -> Option<String> {
        uploaded
            .iter()
            .find(|file| {
                extension_of(&file.path).is_some_and(|ext| self.ctx.previews.supports_preview(&ext))
            })
            .map(|file| file.path.clone())
    }

    fn emit(&self, state: UploadState, progress: Option<f64>) {
        let status = if progress.is_some() {
            OperationStatus::InProgress
        } else {
            OperationStatus::InInfiniteProgress
        };
        self.ctx.events.emit(EngineEvent::Progress(OperationProgress {
            operation_id: self.request.operation_id.clone(),
            kind: OperationKind::Upload,
            status,
            progress,
            description: format!("{} {}", state.description(), self.request.name),
        }));
    }

    fn enter(
        &mut self,
        next: UploadState,
        progress: Option<f64>,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        ensure_not_cancelled(token)?;
        self.transition(next, progress);
        Ok(())
    }

    fn transition(&mut self, next: UploadState, progress: Option<f64>) {
        engine_debug!(
            "upload {}: {:?} -> {:?}",
            self.request.operation_id,
            self.state,
            next
        );
        self.state = next;
        if !next.is_terminal() {
            self.emit(next, progress);
        }
    }
}

/// Uploads that may reference each other through `DependencyEdge::LocalBatch`.
pub struct UploadBatch {
    ctx: UploadContext,
    requests: Vec<UploadRequest>,
    identifiers: Arc<BatchIdentifiers>,
}

impl UploadBatch {
    pub fn new(ctx: UploadContext, requests: Vec<UploadRequest>) -> Self {
        Self {
            ctx,
            requests,
            identifiers: Arc::new(BatchIdentifiers::new()),
        }
    }

    pub fn identifiers(&self) -> Arc<BatchIdentifiers> {
        Arc::clone(&self.identifiers)
    }

    pub fn requests(&self) -> &[UploadRequest] {
        &self.requests
    }

    /// Create the assets that do not exist remotely yet and record every
    /// identifier, so sibling references resolve before any upload starts.
    pub async fn prepare(&self, token: &CancellationToken) -> Result<(), EngineError> {
        for request in &self.requests {
            if let Some(target) = &request.target {
                self.identifiers.assign(&request.batch_key, target.clone());
            }
        }

        let drafts: Vec<AssetDraft> = self
            .requests
            .iter()
            .filter(|request| request.target.is_none())
            .map(|request| AssetDraft {
                batch_key: request.batch_key.clone(),
                name: request.name.clone(),
            })
            .collect();
        let created = join_all(
            drafts
                .iter()
                .map(|draft| self.ctx.service.create_asset(draft, token)),
        )
        .await;
        ensure_not_cancelled(token)?;

        for (draft, result) in drafts.iter().zip(created) {
            let asset = result?;
            engine_info!("created asset {} for batch entry {}", asset, draft.batch_key);
            self.identifiers.assign(draft.batch_key.clone(), asset);
        }
        Ok(())
    }

    pub fn into_operations(self) -> Vec<UploadTransferOperation> {
        let ctx = self.ctx;
        let identifiers = self.identifiers;
        self.requests
            .into_iter()
            .map(|request| UploadTransferOperation::new(ctx.clone(), request, Arc::clone(&identifiers)))
            .collect()
    }
}
