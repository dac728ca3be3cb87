use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{FailureKind, TransferError};
use crate::transfer_set::ByteProgressSink;

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub connect_timeout: Duration,
    pub redirect_limit: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            redirect_limit: 5,
        }
    }
}

#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into `destination`, returning the number of bytes written.
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: &dyn ByteProgressSink,
        token: &CancellationToken,
    ) -> Result<u64, TransferError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestDownloader {
    settings: DownloadSettings,
}

impl ReqwestDownloader {
    pub fn new(settings: DownloadSettings) -> Self {
        Self { settings }
    }

    fn build_client(&self) -> Result<reqwest::Client, TransferError> {
        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(self.settings.redirect_limit))
            .build()
            .map_err(|err| TransferError::new(FailureKind::Network, err.to_string()))
    }
}

#[async_trait::async_trait]
impl Downloader for ReqwestDownloader {
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
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| TransferError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = self.build_client()?;

        let response = client
            .get(parsed)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let expected = response.content_length().filter(|len| *len > 0);
        let mut file = tokio::fs::File::create(destination).await?;
        progress.report(0.0);

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            // Checkpoint between chunks; the request itself is never torn down mid-read.
            if token.is_cancelled() {
                return Err(TransferError::cancelled());
            }
            let chunk: Bytes = chunk.map_err(map_reqwest_error)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(expected) = expected {
                progress.report(written as f64 / expected as f64);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        progress.report(1.0);
        Ok(written)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() {
        return TransferError::new(FailureKind::Timeout, err.to_string());
    }
    TransferError::new(FailureKind::Network, err.to_string())
}
