//! Import: download the files of a remote asset into the project.
//!
//! `Created -> ResolvingManifest -> Downloading -> Finalizing -> {Success | Error | Cancelled}`

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::cache::{cache_key, CacheStore};
use crate::cancellable::ensure_not_cancelled;
use crate::download::Downloader;
use crate::error::{EngineError, FailureKind, TransferError};
use crate::persist::move_into_place;
use crate::progress::{drive_with_progress, ProgressPolicy, ProgressSink};
use crate::service::{AssetRef, AssetService, DatasetInfo};
use crate::transfer_set::{ByteProgressSink, FileTransfer, FileTransferSet, TransferSource};
use crate::types::{EngineEvent, OperationId, OperationKind, OperationProgress, OperationStatus};

/// Suffix of sidecar files that follow their primary file.
pub const META_EXTENSION: &str = ".meta";

#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Downloads land here before being moved into the project.
    pub temp_dir: PathBuf,
    pub progress: ProgressPolicy,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("assetsync").join("downloads"),
            progress: ProgressPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub operation_id: OperationId,
    pub asset: AssetRef,
    pub datasets: Vec<DatasetInfo>,
    pub default_destination: PathBuf,
    /// Destinations recorded in the project for previously imported files, by relative path.
    pub known_paths: HashMap<String, PathBuf>,
}

impl ImportRequest {
    pub fn new(asset: AssetRef, default_destination: impl Into<PathBuf>) -> Self {
        Self {
            operation_id: asset.asset_id.clone(),
            asset,
            datasets: Vec::new(),
            default_destination: default_destination.into(),
            known_paths: HashMap::new(),
        }
    }

    pub fn with_dataset(mut self, dataset: DatasetInfo) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn with_known_path(
        mut self,
        relative_path: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        self.known_paths
            .insert(relative_path.into(), destination.into());
        self
    }
}

/// Collaborators an import runs against.
#[derive(Clone)]
pub struct ImportContext {
    pub service: Arc<dyn AssetService>,
    pub downloader: Arc<dyn Downloader>,
    pub cache: Option<Arc<CacheStore>>,
    pub events: Arc<dyn ProgressSink>,
    pub settings: ImportSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Created,
    ResolvingManifest,
    Downloading,
    Finalizing,
    Success,
    Error,
    Cancelled,
}

impl ImportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportState::Success | ImportState::Error | ImportState::Cancelled
        )
    }

    fn description(self) -> &'static str {
        match self {
            ImportState::Created => "Waiting to import",
            ImportState::ResolvingManifest => "Resolving files of",
            ImportState::Downloading => "Downloading",
            ImportState::Finalizing => "Finalizing",
            ImportState::Success => "Imported",
            ImportState::Error => "Failed to import",
            ImportState::Cancelled => "Cancelled import of",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFile {
    pub relative_path: String,
    pub destination: PathBuf,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub asset: AssetRef,
    pub files: Vec<ImportedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedFile {
    relative_path: String,
    url: String,
    destination: PathBuf,
}

/// Resolve where each manifest file lands in the project, in input order.
///
/// 1. a destination already recorded for that exact file,
/// 2. for a metafile, next to its primary file's destination,
/// 3. otherwise `default_root/relative_path`.
pub fn resolve_destinations(
    files: &[String],
    known: &HashMap<String, PathBuf>,
    default_root: &Path,
) -> Vec<PathBuf> {
    let mut resolved: HashMap<&str, PathBuf> = HashMap::new();

    // Primaries first so their metafiles can follow them.
    for file in files.iter().filter(|f| !is_metafile(f)) {
        let destination = known
            .get(file.as_str())
            .cloned()
            .unwrap_or_else(|| default_root.join(file));
        resolved.insert(file.as_str(), destination);
    }

    for file in files.iter().filter(|f| is_metafile(f)) {
        let destination = if let Some(recorded) = known.get(file.as_str()) {
            recorded.clone()
        } else if let Some(primary) = primary_destination(file, &resolved, known) {
            with_meta_suffix(primary)
        } else {
            default_root.join(file)
        };
        resolved.insert(file.as_str(), destination);
    }

    files
        .iter()
        .map(|file| {
            resolved
                .get(file.as_str())
                .cloned()
                .unwrap_or_else(|| default_root.join(file))
        })
        .collect()
}

/// Manifest path as a `/`-separated path below the destination root.
///
/// Leading separators and `.` segments are dropped. `None` for paths that
/// are empty or could land outside the root (`..`, drive prefixes).
fn project_relative_path(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches(|c| c == '/' || c == '\\');
    let mut segments = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.is_empty() || segments.iter().any(|s| s.contains('\\')) {
        return None;
    }
    Some(segments.join("/"))
}

fn is_metafile(path: &str) -> bool {
    path.len() > META_EXTENSION.len() && path.ends_with(META_EXTENSION)
}

fn primary_destination<'a>(
    metafile: &str,
    resolved: &'a HashMap<&str, PathBuf>,
    known: &'a HashMap<String, PathBuf>,
) -> Option<&'a PathBuf> {
    let primary = metafile.strip_suffix(META_EXTENSION)?;
    resolved.get(primary).or_else(|| known.get(primary))
}

fn with_meta_suffix(primary: &Path) -> PathBuf {
    let mut path = primary.as_os_str().to_os_string();
    path.push(META_EXTENSION);
    PathBuf::from(path)
}

pub struct ImportTransferOperation {
    ctx: ImportContext,
    request: ImportRequest,
    state: ImportState,
}

impl ImportTransferOperation {
    pub fn new(ctx: ImportContext, request: ImportRequest) -> Self {
        Self {
            ctx,
            request,
            state: ImportState::Created,
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn request(&self) -> &ImportRequest {
        &self.request
    }

    pub async fn run(&mut self, token: &CancellationToken) -> Result<ImportOutcome, EngineError> {
        engine_info!(
            "import {} of {} started",
            self.request.operation_id,
            self.request.asset
        );
        let result = match self.execute(token).await {
            Err(err) if !err.is_cancelled() && token.is_cancelled() => Err(EngineError::Cancelled),
            other => other,
        };

        let terminal = match &result {
            Ok(_) => ImportState::Success,
            Err(err) if err.is_cancelled() => ImportState::Cancelled,
            Err(_) => ImportState::Error,
        };
        self.transition(terminal, None);
        self.remove_temp_dir();

        match &result {
            Ok(outcome) => engine_info!(
                "import {} finished, {} file(s)",
                self.request.operation_id,
                outcome.files.len()
            ),
            Err(err) if err.is_cancelled() => {
                engine_info!("import {} cancelled", self.request.operation_id)
            }
            Err(err) => engine_warn!("import {} failed: {}", self.request.operation_id, err),
        }
        result
    }

    async fn execute(&mut self, token: &CancellationToken) -> Result<ImportOutcome, EngineError> {
        self.enter(ImportState::ResolvingManifest, None, token)?;
        let manifest = self.resolve_manifest(token).await?;
        if manifest.is_empty() {
            engine_info!(
                "import {}: manifest is empty, nothing to import",
                self.request.operation_id
            );
            return Ok(ImportOutcome {
                asset: self.request.asset.clone(),
                files: Vec::new(),
            });
        }

        let plan = self.plan(manifest);
        if plan.is_empty() {
            return Err(EngineError::NothingToImport {
                asset: self.request.asset.to_string(),
            });
        }
        self.enter(ImportState::Downloading, Some(0.0), token)?;
        let mut transfers = FileTransferSet::new();
        let handles: Vec<FileTransfer> = plan
            .iter()
            .map(|file| {
                transfers.add(FileTransfer::new(
                    TransferSource::Url(file.url.clone()),
                    self.temp_root().join(&file.relative_path),
                ))
            })
            .collect();

        let results = {
            let this = &*self;
            let work = join_all(
                plan.iter()
                    .zip(handles.iter())
                    .map(|(file, transfer)| this.transfer_file(file, transfer, token)),
            );
            drive_with_progress(
                work,
                &transfers,
                &this.ctx.settings.progress,
                token,
                |progress| this.emit(ImportState::Downloading, Some(progress)),
            )
            .await
        };

        self.enter(ImportState::Finalizing, None, token)?;

        let errors = transfers.errors();
        if let Some((_, first)) = errors.first() {
            return Err(EngineError::Transfers {
                failed: errors.len(),
                total: transfers.len(),
                first: first.clone(),
            });
        }

        Ok(ImportOutcome {
            asset: self.request.asset.clone(),
            files: results.into_iter().flatten().collect(),
        })
    }

    /// Query every eligible dataset concurrently and merge the answers.
    async fn resolve_manifest(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<(String, String)>, EngineError> {
        let eligible: Vec<&DatasetInfo> =
            self.request.datasets.iter().filter(|d| d.eligible).collect();
        engine_debug!(
            "import {}: querying {} dataset(s)",
            self.request.operation_id,
            eligible.len()
        );

        let queries = eligible.iter().map(|dataset| {
            self.ctx
                .service
                .resolve_download_manifest(&self.request.asset, dataset, token)
        });
        let answers = join_all(queries).await;
        ensure_not_cancelled(token)?;

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for answer in answers {
            for (path, url) in answer? {
                let Some(relative) = project_relative_path(&path) else {
                    engine_warn!(
                        "import {}: {:?} leaves the project, skipping",
                        self.request.operation_id,
                        path
                    );
                    continue;
                };
                if seen.insert(relative.clone()) {
                    files.push((relative, url));
                }
            }
        }
        Ok(files)
    }

    fn plan(&self, manifest: Vec<(String, String)>) -> Vec<PlannedFile> {
        let (available, unavailable): (Vec<_>, Vec<_>) =
            manifest.into_iter().partition(|(_, url)| !url.is_empty());
        for (path, _) in &unavailable {
            engine_debug!(
                "import {}: {} has no download url, skipping",
                self.request.operation_id,
                path
            );
        }

        let paths: Vec<String> = available.iter().map(|(path, _)| path.clone()).collect();
        let destinations = resolve_destinations(
            &paths,
            &self.request.known_paths,
            &self.request.default_destination,
        );

        paths
            .into_iter()
            .zip(available)
            .zip(destinations)
            .map(|((relative_path, (_, url)), destination)| PlannedFile {
                relative_path,
                url,
                destination,
            })
            .collect()
    }

    async fn transfer_file(
        &self,
        file: &PlannedFile,
        transfer: &FileTransfer,
        token: &CancellationToken,
    ) -> Option<ImportedFile> {
        match self.fetch_and_place(file, transfer, token).await {
            Ok(from_cache) => {
                transfer.complete();
                Some(ImportedFile {
                    relative_path: file.relative_path.clone(),
                    destination: file.destination.clone(),
                    from_cache,
                })
            }
            Err(err) => {
                if !err.is_cancelled() {
                    engine_warn!(
                        "import {}: {} failed: {}",
                        self.request.operation_id,
                        file.relative_path,
                        err
                    );
                }
                transfer.fail(err);
                None
            }
        }
    }

    async fn fetch_and_place(
        &self,
        file: &PlannedFile,
        transfer: &FileTransfer,
        token: &CancellationToken,
    ) -> Result<bool, TransferError> {
        if token.is_cancelled() {
            return Err(TransferError::cancelled());
        }
        let temp = transfer.destination().to_path_buf();
        if let Some(parent) = temp.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let from_cache = self.fetch(file, transfer, &temp, token).await?;

        let destination = file.destination.clone();
        tokio::task::spawn_blocking(move || move_into_place(&temp, &destination))
            .await
            .map_err(|err| TransferError::new(FailureKind::Io, err.to_string()))?
            .map_err(|err| TransferError::new(FailureKind::Io, err.to_string()))?;
        Ok(from_cache)
    }

    /// Bring the file to `temp`, from the cache when possible.
    async fn fetch(
        &self,
        file: &PlannedFile,
        transfer: &FileTransfer,
        temp: &Path,
        token: &CancellationToken,
    ) -> Result<bool, TransferError> {
        let Some(cache) = self.ctx.cache.clone() else {
            self.ctx
                .downloader
                .download(&file.url, temp, transfer, token)
                .await?;
            return Ok(false);
        };

        let asset = &self.request.asset;
        let key = cache_key(&format!(
            "{}/{}/{}",
            asset.asset_id, asset.version, file.relative_path
        ));
        let _pin = cache.pin(&key);
        if let Some(cached) = cache.try_get(&key) {
            transfer.report(0.0);
            tokio::fs::copy(&cached, temp).await?;
            engine_debug!(
                "import {}: {} served from cache",
                self.request.operation_id,
                file.relative_path
            );
            return Ok(true);
        }

        self.ctx
            .downloader
            .download(&file.url, temp, transfer, token)
            .await?;

        let store = Arc::clone(&cache);
        let source = temp.to_path_buf();
        match tokio::task::spawn_blocking(move || store.put_file(&key, &source)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => engine_warn!("failed to cache {}: {}", file.relative_path, err),
            Err(err) => engine_warn!("failed to cache {}: {}", file.relative_path, err),
        }
        Ok(false)
    }

    fn temp_root(&self) -> PathBuf {
        self.ctx
            .settings
            .temp_dir
            .join(format!("import-{}", cache_key(&self.request.operation_id)))
    }

    fn remove_temp_dir(&self) {
        let root = self.temp_root();
        if let Err(err) = std::fs::remove_dir_all(&root) {
            if err.kind() != io::ErrorKind::NotFound {
                engine_debug!("failed to remove {:?}: {}", root, err);
            }
        }
    }

    fn emit(&self, state: ImportState, progress: Option<f64>) {
        let status = if progress.is_some() {
            OperationStatus::InProgress
        } else {
            OperationStatus::InInfiniteProgress
        };
        self.ctx.events.emit(EngineEvent::Progress(OperationProgress {
            operation_id: self.request.operation_id.clone(),
            kind: OperationKind::Import,
            status,
            progress,
            description: format!("{} {}", state.description(), self.request.asset),
        }));
    }

    /// Phase checkpoint: a cancelled import neither enters nor reports the next phase.
    fn enter(
        &mut self,
        next: ImportState,
        progress: Option<f64>,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        ensure_not_cancelled(token)?;
        self.transition(next, progress);
        Ok(())
    }

    fn transition(&mut self, next: ImportState, progress: Option<f64>) {
        engine_debug!(
            "import {}: {:?} -> {:?}",
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
