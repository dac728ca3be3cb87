use std::fs;
use std::sync::Mutex;

use assetsync_engine::{
    ByteProgressSink, DownloadSettings, Downloader, FailureKind, ReqwestDownloader,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct TestSink {
    reports: Mutex<Vec<f64>>,
}

impl TestSink {
    fn take(&self) -> Vec<f64> {
        self.reports.lock().unwrap().drain(..).collect()
    }
}

impl ByteProgressSink for TestSink {
    fn report(&self, fraction: f64) {
        self.reports.lock().unwrap().push(fraction);
    }
}

#[tokio::test]
async fn downloader_streams_body_to_disk_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/rock.fbx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"binary mesh".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("rock.fbx");
    let downloader = ReqwestDownloader::new(DownloadSettings::default());
    let sink = TestSink::default();
    let url = format!("{}/files/rock.fbx", server.uri());

    let written = downloader
        .download(&url, &destination, &sink, &CancellationToken::new())
        .await
        .expect("download ok");

    assert_eq!(written, 11);
    assert_eq!(fs::read(&destination).unwrap(), b"binary mesh");
    let reports = sink.take();
    assert_eq!(reports.first(), Some(&0.0));
    assert_eq!(reports.last(), Some(&1.0));
}

#[tokio::test]
async fn downloader_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("missing.bin");
    let downloader = ReqwestDownloader::new(DownloadSettings::default());
    let url = format!("{}/missing", server.uri());

    let err = downloader
        .download(&url, &destination, &TestSink::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(!destination.exists());
}

#[tokio::test]
async fn downloader_rejects_invalid_url() {
    let dir = TempDir::new().unwrap();
    let downloader = ReqwestDownloader::new(DownloadSettings::default());

    let err = downloader
        .download(
            "not a url",
            &dir.path().join("x"),
            &TestSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::InvalidUrl);
}

#[tokio::test]
async fn cancelled_token_skips_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let downloader = ReqwestDownloader::new(DownloadSettings::default());
    let token = CancellationToken::new();
    token.cancel();

    let err = downloader
        .download(
            &format!("{}/any", server.uri()),
            &dir.path().join("any"),
            &TestSink::default(),
            &token,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}
