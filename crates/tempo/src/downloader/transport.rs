//! The seam between the downloader state machine and the worker that moves bytes.
//!
//! A [`Transport`] runs on its own task and never touches shared state; every
//! observation goes through the [`TransferSender`] it is handed, which tags it
//! with the transfer id and marshals it into the owning context's inbox.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::DownloadError;
use crate::events::EngineMessage;

/// Identity of one transfer. Deliveries carrying a superseded id are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a transfer should fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    /// First byte to request. `None` fetches the whole resource.
    pub range_start: Option<u64>,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            range_start: None,
        }
    }

    pub fn with_range_start(mut self, start: u64) -> Self {
        self.range_start = Some(start);
        self
    }

    /// Value of the `Range` header, open-ended.
    pub fn range_header(&self) -> Option<String> {
        self.range_start.map(|start| format!("bytes={start}-"))
    }
}

/// Response headers the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    /// Body length of this response
    pub content_length: Option<u64>,
    /// Size of the whole resource (from `Content-Range` on partial responses)
    pub total_size: Option<u64>,
    pub accept_ranges: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ResponseInfo {
    /// `HeaderMap` lookups are case-insensitive, so `ETag` and `Etag` both match.
    pub fn from_headers(status: StatusCode, headers: &HeaderMap, content_length: Option<u64>) -> Self {
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_owned())
        };

        let content_range_total = text(header::CONTENT_RANGE)
            .as_deref()
            .and_then(parse_content_range_total);

        let total_size = if status == StatusCode::PARTIAL_CONTENT {
            content_range_total.or(content_length)
        } else {
            content_length
        };

        Self {
            status: status.as_u16(),
            content_length,
            total_size,
            accept_ranges: text(header::ACCEPT_RANGES),
            etag: text(header::ETAG),
            last_modified: text(header::LAST_MODIFIED),
        }
    }

    /// `Accept-Ranges: bytes` or a partial-content answer.
    pub fn supports_range(&self) -> bool {
        self.advertises_byte_ranges() || self.status == StatusCode::PARTIAL_CONTENT.as_u16()
    }

    pub fn advertises_byte_ranges(&self) -> bool {
        self.accept_ranges
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case("bytes"))
    }

    /// Cache validator: entity tag first, then last-modified, else empty.
    pub fn validator(&self) -> String {
        self.etag
            .clone()
            .or_else(|| self.last_modified.clone())
            .unwrap_or_default()
    }
}

/// Parses the complete length out of `bytes 200-999/1000`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (unit, rest) = value.split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}

/// Observation produced by a transfer worker.
#[derive(Debug)]
pub enum TransferEvent {
    Response(ResponseInfo),
    Chunk(Bytes),
    Finished(Result<(), DownloadError>),
}

/// A transfer event tagged with the transfer that produced it.
#[derive(Debug)]
pub struct TransferMessage {
    pub transfer: TransferId,
    pub event: TransferEvent,
}

/// Handle a transport uses to report back to the owning context.
pub struct TransferSender {
    transfer: TransferId,
    inbox: mpsc::UnboundedSender<EngineMessage>,
    paused: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl TransferSender {
    pub(crate) fn new(
        transfer: TransferId,
        inbox: mpsc::UnboundedSender<EngineMessage>,
        paused: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transfer,
            inbox,
            paused,
            cancel,
        }
    }

    pub fn transfer(&self) -> TransferId {
        self.transfer
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn send(&self, event: TransferEvent) -> Result<(), DownloadError> {
        self.inbox
            .send(EngineMessage::Transfer(TransferMessage {
                transfer: self.transfer,
                event,
            }))
            .map_err(|_| DownloadError::Cancelled)
    }

    /// Report response headers.
    pub fn response(&self, info: ResponseInfo) -> Result<(), DownloadError> {
        self.send(TransferEvent::Response(info))
    }

    /// Deliver a chunk, waiting while the transfer is paused.
    pub async fn chunk(&mut self, data: Bytes) -> Result<(), DownloadError> {
        if *self.paused.borrow() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                resumed = self.paused.wait_for(|paused| !*paused) => {
                    if resumed.is_err() {
                        return Err(DownloadError::Cancelled);
                    }
                }
            }
        }
        self.send(TransferEvent::Chunk(data))
    }

    pub(crate) fn finish(&self, result: Result<(), DownloadError>) {
        // the owning context may be gone already
        let _ = self.send(TransferEvent::Finished(result));
    }
}

/// Moves bytes for one transfer. Runs on a worker task and may block there.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        sender: &mut TransferSender,
    ) -> Result<(), DownloadError>;
}
