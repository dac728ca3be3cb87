#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assetsync_engine::{
    AssetDraft, AssetRef, AssetService, ByteProgressSink, DatasetInfo, DownloadManifest,
    Downloader, EngineEvent, FailureKind, GeneratedPreview, MetadataUpdate, OperationProgress,
    PreviewGenerator, ProgressSink, ServiceError, TransferError, UploadStream, UploadedFile,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(&self) -> Vec<OperationProgress> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory asset service recording every call it receives.
#[derive(Default)]
pub struct FakeAssetService {
    pub manifests: Mutex<HashMap<String, DownloadManifest>>,
    /// `resolve_download_manifest` waits for cancellation instead of answering.
    pub hold_manifest: bool,
    pub queried_datasets: Mutex<Vec<String>>,
    pub created: Mutex<Vec<AssetDraft>>,
    pub dependencies: Mutex<HashMap<AssetRef, BTreeSet<AssetRef>>>,
    pub dependency_updates: AtomicUsize,
    pub uploads: Mutex<Vec<(AssetRef, String, Vec<u8>)>>,
    /// `upload_file` reads its content, then waits for cancellation instead of finishing.
    pub hold_uploads: bool,
    pub uploads_started: AtomicUsize,
    pub thumbnails: Mutex<Vec<(AssetRef, Vec<u8>)>>,
    pub removed: Mutex<Vec<String>>,
    pub metadata: Mutex<Vec<MetadataUpdate>>,
    pub statuses: Mutex<Vec<String>>,
    pub failing_status: Option<String>,
    pub failing_freeze: bool,
    pub frozen: Mutex<Vec<AssetRef>>,
}

impl FakeAssetService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(self, dataset: &str, files: &[(&str, &str)]) -> Self {
        let manifest = files
            .iter()
            .map(|(path, url)| (path.to_string(), url.to_string()))
            .collect();
        self.manifests
            .lock()
            .unwrap()
            .insert(dataset.to_string(), manifest);
        self
    }

    pub fn with_dependencies(self, target: &AssetRef, existing: &[AssetRef]) -> Self {
        self.dependencies
            .lock()
            .unwrap()
            .insert(target.clone(), existing.iter().cloned().collect());
        self
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait::async_trait]
impl AssetService for FakeAssetService {
    async fn resolve_download_manifest(
        &self,
        _asset: &AssetRef,
        dataset: &DatasetInfo,
        token: &CancellationToken,
    ) -> Result<DownloadManifest, ServiceError> {
        self.queried_datasets.lock().unwrap().push(dataset.id.clone());
        if self.hold_manifest {
            token.cancelled().await;
            return Err(ServiceError::Cancelled);
        }
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .get(&dataset.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_asset(
        &self,
        draft: &AssetDraft,
        _token: &CancellationToken,
    ) -> Result<AssetRef, ServiceError> {
        let mut created = self.created.lock().unwrap();
        created.push(draft.clone());
        Ok(AssetRef::new(format!("remote-{}", draft.batch_key), "1"))
    }

    async fn upload_file(
        &self,
        target: &AssetRef,
        destination: &str,
        mut content: UploadStream,
        progress: &dyn ByteProgressSink,
        token: &CancellationToken,
    ) -> Result<UploadedFile, ServiceError> {
        if token.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        self.uploads_started.fetch_add(1, Ordering::SeqCst);
        let mut bytes = Vec::new();
        content
            .reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        if self.hold_uploads {
            progress.report(0.5);
            token.cancelled().await;
            return Err(ServiceError::Cancelled);
        }
        progress.report(1.0);
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((target.clone(), destination.to_string(), bytes));
        Ok(UploadedFile {
            path: destination.to_string(),
            file_id: format!("file-{}", uploads.len()),
        })
    }

    async fn upload_thumbnail(
        &self,
        target: &AssetRef,
        thumbnail: &Path,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let content =
            std::fs::read(thumbnail).map_err(|err| ServiceError::Transport(err.to_string()))?;
        self.thumbnails.lock().unwrap().push((target.clone(), content));
        Ok(())
    }

    async fn remove_files(
        &self,
        _target: &AssetRef,
        paths: &[String],
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        self.removed.lock().unwrap().extend(paths.iter().cloned());
        Ok(())
    }

    async fn get_dependencies(
        &self,
        target: &AssetRef,
        _token: &CancellationToken,
    ) -> Result<BTreeSet<AssetRef>, ServiceError> {
        Ok(self
            .dependencies
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_dependencies(
        &self,
        target: &AssetRef,
        desired: &BTreeSet<AssetRef>,
        _existing: &BTreeSet<AssetRef>,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        self.dependency_updates.fetch_add(1, Ordering::SeqCst);
        self.dependencies
            .lock()
            .unwrap()
            .insert(target.clone(), desired.clone());
        Ok(())
    }

    async fn update_metadata(
        &self,
        _target: &AssetRef,
        update: &MetadataUpdate,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        self.metadata.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        _target: &AssetRef,
        status: &str,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        if self.failing_status.as_deref() == Some(status) {
            return Err(ServiceError::Rejected(format!("status {status} refused")));
        }
        self.statuses.lock().unwrap().push(status.to_string());
        Ok(())
    }

    async fn freeze(
        &self,
        target: &AssetRef,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        if self.failing_freeze {
            return Err(ServiceError::Rejected("version is locked".to_string()));
        }
        self.frozen.lock().unwrap().push(target.clone());
        Ok(())
    }
}

/// Serves file contents from memory keyed by URL.
#[derive(Default)]
pub struct FakeDownloader {
    pub files: HashMap<String, Vec<u8>>,
    pub failing: HashSet<String>,
    pub downloads: AtomicUsize,
    /// Downloads write half their content, then wait for cancellation.
    pub hold: bool,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serving(mut self, url: &str, content: &[u8]) -> Self {
        self.files.insert(url.to_string(), content.to_vec());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn holding(mut self) -> Self {
        self.hold = true;
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: &dyn ByteProgressSink,
        token: &CancellationToken,
    ) -> Result<u64, TransferError> {
        if token.is_cancelled() {
            return Err(TransferError::cancelled());
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(TransferError::new(FailureKind::HttpStatus(404), "not found"));
        }
        let content = self
            .files
            .get(url)
            .ok_or_else(|| TransferError::new(FailureKind::HttpStatus(404), url.to_string()))?;
        if self.hold {
            tokio::fs::write(destination, &content[..content.len() / 2]).await?;
            progress.report(0.5);
            token.cancelled().await;
            return Err(TransferError::cancelled());
        }
        progress.report(0.5);
        tokio::fs::write(destination, content).await?;
        progress.report(1.0);
        Ok(content.len() as u64)
    }
}

/// Generates a fixed thumbnail and treats `.fbx` as previewable.
#[derive(Default)]
pub struct FakePreviews {
    pub fail: bool,
    pub generated: AtomicUsize,
}

#[async_trait::async_trait]
impl PreviewGenerator for FakePreviews {
    fn supports_preview(&self, extension: &str) -> bool {
        self.supports_native_preview(extension) || extension == "fbx"
    }

    async fn generate(
        &self,
        _files: &[PathBuf],
        _token: &CancellationToken,
    ) -> Result<Option<GeneratedPreview>, ServiceError> {
        if self.fail {
            return Err(ServiceError::Transport("renderer crashed".to_string()));
        }
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(Some(GeneratedPreview {
            content: b"thumbnail".to_vec(),
            tags: vec!["generated-preview".to_string()],
        }))
    }
}
