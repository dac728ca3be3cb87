//! Contract of the remote asset service collaborator.
//!
//! The wire protocol lives outside this crate; hosts implement `AssetService`
//! over whatever client they use and hand it to the operations explicitly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::status::StatusFlow;
use crate::transfer_set::ByteProgressSink;

/// One version of a remote asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetRef {
    pub asset_id: String,
    pub version: String,
}

impl AssetRef {
    pub fn new(asset_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset_id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    /// Whether the dataset passes the import filter.
    pub eligible: bool,
}

impl DatasetInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            eligible: true,
        }
    }
}

/// Relative file path -> download URL. An empty URL marks an unavailable file.
pub type DownloadManifest = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: String,
    pub file_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub preview_file: Option<String>,
    pub tags: Vec<String>,
}

/// A new asset to create before its files are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDraft {
    pub batch_key: String,
    pub name: String,
}

/// File content streamed from disk.
pub struct UploadStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub length: u64,
}

impl fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait AssetService: Send + Sync {
    async fn resolve_download_manifest(
        &self,
        asset: &AssetRef,
        dataset: &DatasetInfo,
        token: &CancellationToken,
    ) -> Result<DownloadManifest, ServiceError>;

    async fn create_asset(
        &self,
        draft: &AssetDraft,
        token: &CancellationToken,
    ) -> Result<AssetRef, ServiceError>;

    async fn upload_file(
        &self,
        target: &AssetRef,
        destination: &str,
        content: UploadStream,
        progress: &dyn ByteProgressSink,
        token: &CancellationToken,
    ) -> Result<UploadedFile, ServiceError>;

    async fn upload_thumbnail(
        &self,
        target: &AssetRef,
        thumbnail: &Path,
        token: &CancellationToken,
    ) -> Result<(), ServiceError>;

    async fn remove_files(
        &self,
        target: &AssetRef,
        paths: &[String],
        token: &CancellationToken,
    ) -> Result<(), ServiceError>;

    async fn get_dependencies(
        &self,
        target: &AssetRef,
        token: &CancellationToken,
    ) -> Result<BTreeSet<AssetRef>, ServiceError>;

    /// Replace the dependency set; the service applies the difference.
    async fn update_dependencies(
        &self,
        target: &AssetRef,
        desired: &BTreeSet<AssetRef>,
        existing: &BTreeSet<AssetRef>,
        token: &CancellationToken,
    ) -> Result<(), ServiceError>;

    async fn update_metadata(
        &self,
        target: &AssetRef,
        update: &MetadataUpdate,
        token: &CancellationToken,
    ) -> Result<(), ServiceError>;

    async fn update_status(
        &self,
        target: &AssetRef,
        status: &str,
        token: &CancellationToken,
    ) -> Result<(), ServiceError>;

    async fn freeze(&self, target: &AssetRef, token: &CancellationToken)
        -> Result<(), ServiceError>;

    fn status_transition_path(
        &self,
        flow: &StatusFlow,
        from: &str,
        to: &str,
    ) -> Option<Vec<String>> {
        flow.transition_path(from, to)
    }
}
