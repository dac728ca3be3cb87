//! Assetsync engine: cancellable transfer operations, file transfers and the local cache.
mod cache;
mod cancellable;
mod download;
mod engine;
mod error;
mod eviction;
mod import;
mod persist;
mod preview;
mod progress;
mod service;
mod status;
mod transfer_set;
mod types;
mod upload;

pub use cache::{
    cache_key, CacheEntry, CacheError, CachePin, CacheSettings, CacheStore, EvictionReport,
};
pub use cancellable::{CancellableOperation, Outcome, StartError};
pub use download::{DownloadSettings, Downloader, ReqwestDownloader};
pub use engine::{EngineConfig, EngineHandle, EngineServices};
pub use error::{EngineError, FailureKind, ServiceError, TransferError};
pub use eviction::{
    EntryView, EvictionPolicy, EvictionSelection, GIGABYTE, MAX_CACHE_GIGABYTES,
    MIN_CACHE_GIGABYTES,
};
pub use import::{
    resolve_destinations, ImportContext, ImportOutcome, ImportRequest, ImportSettings,
    ImportState, ImportTransferOperation, ImportedFile, META_EXTENSION,
};
pub use persist::{ensure_dir, move_into_place, AtomicFileWriter, PersistError};
pub use preview::{extension_of, GeneratedPreview, NativePreviewsOnly, PreviewGenerator};
pub use progress::{drive_with_progress, ChannelProgressSink, ProgressPolicy, ProgressSink};
pub use service::{
    AssetDraft, AssetRef, AssetService, DatasetInfo, DownloadManifest, MetadataUpdate,
    UploadStream, UploadedFile,
};
pub use status::StatusFlow;
pub use transfer_set::{
    ByteProgressSink, FileTransfer, FileTransferSet, TransferSetStatus, TransferSource, UNSTARTED,
};
pub use types::{
    EngineEvent, OperationId, OperationKind, OperationProgress, OperationReport, OperationStatus,
};
pub use upload::{
    resolve_dependencies, BatchIdentifiers, DependencyDiff, DependencyEdge, LocalFile,
    UploadBatch, UploadContext, UploadOutcome, UploadRequest, UploadSettings, UploadState,
    UploadTransferOperation, UploadWarning,
};
