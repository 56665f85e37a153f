//! Downloader against a real HTTP server: full fetch, a connection dropped
//! mid-body and resumed with a byte range, and servers that ignore ranges.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use tempo_engine::{DownloadError, DownloaderConfig, ResumableData};
use tempo_engine::downloader::{DownloadNotification, DownloadState, Downloader, HttpTransport};
use tempo_engine::events::EngineMessage;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use url::Url;

const TOTAL_SIZE: usize = 100_000;
const DROP_AT: usize = 40_000;
const ETAG: &str = "\"v1\"";

#[derive(Clone)]
struct ServerState {
    data: Arc<Vec<u8>>,
}

fn test_data() -> Vec<u8> {
    (0..TOTAL_SIZE).map(|i| (i % 251) as u8).collect()
}

fn requested_start(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("bytes="))
        .and_then(|range| range.split('-').next())
        .and_then(|start| start.parse().ok())
}

fn partial(data: &[u8], start: usize) -> Response {
    let body = Bytes::copy_from_slice(&data[start..]);
    (
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_LENGTH, body.len().to_string()),
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, data.len() - 1, data.len()),
            ),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::ETAG, ETAG.to_string()),
        ],
        body,
    )
        .into_response()
}

/// Well-behaved server with range support.
async fn track(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if let Some(start) = requested_start(&headers) {
        return partial(&state.data, start);
    }
    (
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, TOTAL_SIZE.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::ETAG, ETAG.to_string()),
        ],
        Bytes::copy_from_slice(&state.data),
    )
        .into_response()
}

/// Full requests lose the connection after `DROP_AT` bytes; range requests succeed.
async fn flaky(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if let Some(start) = requested_start(&headers) {
        return partial(&state.data, start);
    }
    let first = Bytes::copy_from_slice(&state.data[..DROP_AT]);
    let body = futures::stream::iter(vec![
        Ok(first),
        Err(std::io::Error::other("connection dropped")),
    ]);
    (
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, TOTAL_SIZE.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::ETAG, ETAG.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Always answers 200 with the whole body.
async fn plain(State(state): State<ServerState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_LENGTH, TOTAL_SIZE.to_string())],
        Bytes::copy_from_slice(&state.data),
    )
        .into_response()
}

async fn setup_server() -> (Url, oneshot::Sender<()>) {
    let state = ServerState {
        data: Arc::new(test_data()),
    };
    let app = Router::new()
        .route("/track.mp3", get(track))
        .route("/flaky.mp3", get(flaky))
        .route("/plain.mp3", get(plain))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base: Url = format!("http://{addr}/").parse().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    (base, shutdown_tx)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn downloader() -> (Downloader, mpsc::UnboundedReceiver<EngineMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = DownloaderConfig {
        use_system_proxy: false,
        ..Default::default()
    };
    let transport = HttpTransport::with_config(&config).unwrap();
    (Downloader::new(Arc::new(transport), tx), rx)
}

/// Everything one transfer produced, up to its terminal notification.
#[derive(Default)]
struct Collected {
    body: Vec<u8>,
    last_progress: Option<f32>,
    range_support: Option<(bool, Option<i64>)>,
    completed: bool,
    failure: Option<DownloadNotification>,
}

async fn collect(
    downloader: &mut Downloader,
    inbox: &mut mpsc::UnboundedReceiver<EngineMessage>,
) -> Collected {
    let mut collected = Collected::default();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), inbox.recv())
            .await
            .expect("transfer stalled")
            .expect("inbox closed");
        let EngineMessage::Transfer(message) = message else {
            continue;
        };
        for notification in downloader.apply(message) {
            match notification {
                DownloadNotification::RangeSupport {
                    supports_range,
                    total_size,
                } => collected.range_support = Some((supports_range, total_size)),
                DownloadNotification::Data { chunk, progress } => {
                    collected.body.extend_from_slice(&chunk);
                    collected.last_progress = Some(progress);
                }
                DownloadNotification::Completed => {
                    collected.completed = true;
                    return collected;
                }
                failed @ DownloadNotification::Failed { .. } => {
                    collected.failure = Some(failed);
                    return collected;
                }
            }
        }
    }
}

#[tokio::test]
async fn test_full_download() {
    init_tracing();
    let (base, _shutdown) = setup_server().await;
    let (mut downloader, mut inbox) = downloader();

    downloader.open(base.join("track.mp3").unwrap());
    let collected = collect(&mut downloader, &mut inbox).await;

    assert!(collected.completed);
    assert_eq!(collected.body, test_data());
    assert_eq!(collected.range_support, Some((true, Some(TOTAL_SIZE as i64))));
    assert_eq!(collected.last_progress, Some(1.0));
    assert_eq!(downloader.state(), DownloadState::Completed);
}

#[tokio::test]
async fn test_dropped_connection_resumes_with_range() {
    init_tracing();
    let (base, _shutdown) = setup_server().await;
    let (mut downloader, mut inbox) = downloader();
    let data = test_data();

    downloader.open(base.join("flaky.mp3").unwrap());
    let first = collect(&mut downloader, &mut inbox).await;
    assert!(!first.completed);
    assert_eq!(downloader.state(), DownloadState::CompletedWithError);

    let Some(DownloadNotification::Failed {
        error,
        bytes_staged,
        response,
    }) = first.failure
    else {
        panic!("expected a failure");
    };
    assert!(!error.is_cancelled());
    assert_eq!(bytes_staged, first.body.len() as i64);
    assert!(first.body.len() <= DROP_AT);
    assert_eq!(first.body, data[..first.body.len()]);

    let response = response.expect("headers were received");
    let resumable = ResumableData::from_failure(0, &response, bytes_staged).expect("server advertises ranges");
    assert_eq!(resumable.validator, ETAG);
    assert_eq!(resumable.range_header(), format!("bytes={bytes_staged}-"));

    downloader.resume(&resumable).unwrap();
    assert_eq!(
        downloader.session().unwrap().request.range_header(),
        Some(resumable.range_header())
    );
    let second = collect(&mut downloader, &mut inbox).await;
    assert!(second.completed);
    // total comes from Content-Range on the partial answer
    assert_eq!(second.range_support, Some((true, Some(TOTAL_SIZE as i64))));

    let mut assembled = first.body;
    assembled.extend_from_slice(&second.body);
    assert_eq!(assembled, data);
}

#[tokio::test]
async fn test_range_ignored_by_server_fails_the_resume() {
    init_tracing();
    let (base, _shutdown) = setup_server().await;
    let (mut downloader, mut inbox) = downloader();

    downloader.open(base.join("plain.mp3").unwrap());
    downloader.resume(&ResumableData::at_offset(5_000)).unwrap();
    let collected = collect(&mut downloader, &mut inbox).await;

    assert!(collected.body.is_empty());
    let Some(DownloadNotification::Failed { error, response, .. }) = collected.failure else {
        panic!("expected a failure");
    };
    assert!(matches!(error, DownloadError::RangeIgnored));
    assert!(response.is_none());
}

#[tokio::test]
async fn test_missing_resource_reports_status() {
    init_tracing();
    let (base, _shutdown) = setup_server().await;
    let (mut downloader, mut inbox) = downloader();

    downloader.open(base.join("missing.mp3").unwrap());
    let collected = collect(&mut downloader, &mut inbox).await;

    let Some(DownloadNotification::Failed { error, .. }) = collected.failure else {
        panic!("expected a failure");
    };
    assert!(matches!(error, DownloadError::StatusCode(status) if status == StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_stopped_transfer_delivers_nothing() {
    init_tracing();
    let (base, _shutdown) = setup_server().await;
    let (mut downloader, mut inbox) = downloader();

    downloader.open(base.join("track.mp3").unwrap());
    downloader.stop();
    assert_eq!(downloader.state(), DownloadState::Stopped);

    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(message) = inbox.try_recv() {
        if let EngineMessage::Transfer(message) = message {
            assert!(downloader.apply(message).is_empty());
        }
    }
}
