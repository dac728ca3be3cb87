#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assetsync_app::{CompletedOperation, Session, Settings};
use assetsync_engine::{
    AssetDraft, AssetRef, AssetService, ByteProgressSink, DatasetInfo, DownloadManifest,
    Downloader, EngineHandle, EngineServices, MetadataUpdate, NativePreviewsOnly, ServiceError,
    TransferError, UploadStream, UploadedFile,
};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Asset service answering manifests from memory. With a gate, every
/// manifest request waits for a permit (or cancellation).
#[derive(Default)]
pub struct StubService {
    pub manifests: HashMap<String, DownloadManifest>,
    pub gate: Option<Arc<Semaphore>>,
    pub manifest_requests: AtomicUsize,
    pub uploads: Mutex<Vec<String>>,
}

impl StubService {
    pub fn with_manifest(mut self, asset_id: &str, files: &[(&str, &str)]) -> Self {
        let manifest = files
            .iter()
            .map(|(path, url)| (path.to_string(), url.to_string()))
            .collect();
        self.manifests.insert(asset_id.to_string(), manifest);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait::async_trait]
impl AssetService for StubService {
    async fn resolve_download_manifest(
        &self,
        asset: &AssetRef,
        _dataset: &DatasetInfo,
        token: &CancellationToken,
    ) -> Result<DownloadManifest, ServiceError> {
        self.manifest_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    permit.map_err(|err| ServiceError::Transport(err.to_string()))?.forget();
                }
                _ = token.cancelled() => return Err(ServiceError::Cancelled),
            }
        }
        Ok(self
            .manifests
            .get(&asset.asset_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_asset(
        &self,
        draft: &AssetDraft,
        _token: &CancellationToken,
    ) -> Result<AssetRef, ServiceError> {
        Ok(AssetRef::new(format!("remote-{}", draft.batch_key), "1"))
    }

    async fn upload_file(
        &self,
        _target: &AssetRef,
        destination: &str,
        mut content: UploadStream,
        progress: &dyn ByteProgressSink,
        _token: &CancellationToken,
    ) -> Result<UploadedFile, ServiceError> {
        let mut bytes = Vec::new();
        content
            .reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        progress.report(1.0);
        self.uploads.lock().unwrap().push(destination.to_string());
        Ok(UploadedFile {
            path: destination.to_string(),
            file_id: destination.to_string(),
        })
    }

    async fn upload_thumbnail(
        &self,
        _target: &AssetRef,
        _thumbnail: &Path,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn remove_files(
        &self,
        _target: &AssetRef,
        _paths: &[String],
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn get_dependencies(
        &self,
        _target: &AssetRef,
        _token: &CancellationToken,
    ) -> Result<BTreeSet<AssetRef>, ServiceError> {
        Ok(BTreeSet::new())
    }

    async fn update_dependencies(
        &self,
        _target: &AssetRef,
        _desired: &BTreeSet<AssetRef>,
        _existing: &BTreeSet<AssetRef>,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn update_metadata(
        &self,
        _target: &AssetRef,
        _update: &MetadataUpdate,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn update_status(
        &self,
        _target: &AssetRef,
        _status: &str,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn freeze(
        &self,
        _target: &AssetRef,
        _token: &CancellationToken,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Writes the URL itself as the file content.
pub struct EchoDownloader;

#[async_trait::async_trait]
impl Downloader for EchoDownloader {
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
        tokio::fs::write(destination, url.as_bytes()).await?;
        progress.report(1.0);
        Ok(url.len() as u64)
    }
}

pub fn settings(root: &Path) -> Settings {
    Settings {
        temp_dir: root.join("tmp"),
        cache_dir: root.join("cache"),
        state_dir: root.join("state"),
        progress_cadence_ms: 10,
        ..Settings::default()
    }
}

pub fn engine(settings: &Settings, service: Arc<StubService>) -> EngineHandle {
    let services = EngineServices {
        service,
        downloader: Arc::new(EchoDownloader),
        previews: Arc::new(NativePreviewsOnly),
        cache: None,
    };
    EngineHandle::new(services, settings.engine_config()).unwrap()
}

/// Pump until `count` operations have completed, panicking after ten seconds.
pub fn wait_completed(session: &mut Session, count: usize) -> Vec<CompletedOperation> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut completed = Vec::new();
    while completed.len() < count {
        assert!(Instant::now() < deadline, "only {} operation(s) completed", completed.len());
        completed.extend(session.pump_timeout(Duration::from_millis(50)));
    }
    completed
}
