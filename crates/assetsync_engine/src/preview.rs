use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// Formats the asset service renders as previews without a generated thumbnail.
const NATIVE_PREVIEW_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// A thumbnail produced for an asset that has no native preview file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPreview {
    pub content: Vec<u8>,
    pub tags: Vec<String>,
}

#[async_trait::async_trait]
pub trait PreviewGenerator: Send + Sync {
    fn supports_native_preview(&self, extension: &str) -> bool {
        NATIVE_PREVIEW_EXTENSIONS
            .iter()
            .any(|native| native.eq_ignore_ascii_case(extension))
    }

    /// Whether a file with this extension can serve as the asset's preview.
    fn supports_preview(&self, extension: &str) -> bool {
        self.supports_native_preview(extension)
    }

    async fn generate(
        &self,
        files: &[PathBuf],
        token: &CancellationToken,
    ) -> Result<Option<GeneratedPreview>, ServiceError>;
}

/// Relies on native previews only and never generates thumbnails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePreviewsOnly;

#[async_trait::async_trait]
impl PreviewGenerator for NativePreviewsOnly {
    async fn generate(
        &self,
        _files: &[PathBuf],
        _token: &CancellationToken,
    ) -> Result<Option<GeneratedPreview>, ServiceError> {
        Ok(None)
    }
}

/// Lower-cased extension of a file path, if any.
pub fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}
