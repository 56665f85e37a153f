//! # Downloader
//!
//! Owning-context half of a streaming HTTP fetch. The [`Downloader`] holds the
//! explicit state machine and the per-transfer [`DownloadSession`]; the bytes are
//! moved by a [`Transport`] on a worker task, and every delivery comes back
//! through [`Downloader::apply`], which drops anything from a superseded transfer.

mod http;
mod transport;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::events::EngineMessage;
use crate::{DownloadError, ResumableData};

pub use http::{HttpTransport, create_client};
pub use transport::{
    FetchRequest, ResponseInfo, TransferEvent, TransferId, TransferMessage, TransferSender,
    Transport,
};

/// Progress value reported when the total size is unknown.
pub const UNKNOWN_PROGRESS: f32 = -1.0;

/// Lifecycle of the current transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    NotStarted,
    Started,
    Paused,
    Stopped,
    Completed,
    CompletedWithError,
}

/// Per-transfer bookkeeping, replaced on every open, resume and stop.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    pub transfer: TransferId,
    pub request: FetchRequest,
    /// Size of the whole resource, when the server said so
    pub total_size: Option<i64>,
    /// Body length of the current response
    pub expected_length: Option<i64>,
    pub supports_range: bool,
    /// Bytes received by this transfer; never decreases
    pub bytes_received: i64,
    /// Bytes already staged by earlier transfers that this one resumes
    pub staged_before: i64,
    pub response: Option<ResponseInfo>,
}

impl DownloadSession {
    fn new(transfer: TransferId, request: FetchRequest, staged_before: i64) -> Self {
        Self {
            transfer,
            request,
            total_size: None,
            expected_length: None,
            supports_range: false,
            bytes_received: 0,
            staged_before,
            response: None,
        }
    }

    /// Fraction of this response body received, or [`UNKNOWN_PROGRESS`].
    pub fn progress(&self) -> f32 {
        match self.expected_length {
            Some(expected) if expected > 0 => self.bytes_received as f32 / expected as f32,
            _ => UNKNOWN_PROGRESS,
        }
    }
}

/// What the owning context learns from an applied delivery.
#[derive(Debug)]
pub enum DownloadNotification {
    /// Response headers arrived.
    RangeSupport {
        supports_range: bool,
        total_size: Option<i64>,
    },
    /// A chunk arrived. `progress` is cumulative for this transfer.
    Data { chunk: Bytes, progress: f32 },
    Completed,
    /// Terminal transport failure. Never produced for local cancellation.
    Failed {
        error: DownloadError,
        bytes_staged: i64,
        response: Option<ResponseInfo>,
    },
}

struct ActiveTransfer {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

/// Streaming HTTP fetch with byte-range resume.
pub struct Downloader {
    transport: Arc<dyn Transport>,
    inbox: mpsc::UnboundedSender<EngineMessage>,
    url: Option<Url>,
    state: DownloadState,
    session: Option<DownloadSession>,
    active: Option<ActiveTransfer>,
    next_transfer: u64,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, inbox: mpsc::UnboundedSender<EngineMessage>) -> Self {
        Self {
            transport,
            inbox,
            url: None,
            state: DownloadState::NotStarted,
            session: None,
            active: None,
            next_transfer: 0,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn session(&self) -> Option<&DownloadSession> {
        self.session.as_ref()
    }

    /// The transfer whose deliveries are currently accepted.
    pub fn current_transfer(&self) -> Option<TransferId> {
        self.session.as_ref().map(|session| session.transfer)
    }

    /// Fetch `url` from the start, replacing any transfer in flight.
    pub fn open(&mut self, url: Url) -> TransferId {
        if self.state == DownloadState::Started || self.state == DownloadState::Paused {
            self.stop();
        }
        self.url = Some(url.clone());
        self.state = DownloadState::NotStarted;
        let transfer = self.prepare(FetchRequest::new(url), 0);
        self.start();
        transfer
    }

    /// Restart the current URL at `resumable`'s resume point.
    pub fn resume(&mut self, resumable: &ResumableData) -> Option<TransferId> {
        let url = self.url.clone()?;
        self.stop();

        let resume_point = resumable.resume_point().max(0) as u64;
        info!(url = %url, resume_point, validator = %resumable.validator, "Resuming download");
        let request = FetchRequest::new(url).with_range_start(resume_point);
        let transfer = self.prepare(request, resumable.bytes_staged);
        self.state = DownloadState::NotStarted;
        self.start();
        Some(transfer)
    }

    fn prepare(&mut self, request: FetchRequest, staged_before: i64) -> TransferId {
        self.next_transfer += 1;
        let transfer = TransferId(self.next_transfer);
        self.session = Some(DownloadSession::new(transfer, request, staged_before));
        self.active = None;
        transfer
    }

    /// Start the prepared transfer, or continue a paused one.
    pub fn start(&mut self) {
        match self.state {
            DownloadState::Completed | DownloadState::Started => {}
            DownloadState::Paused => {
                if let Some(active) = &self.active {
                    active.paused.send_replace(false);
                    self.state = DownloadState::Started;
                }
            }
            _ => {
                let Some(session) = &self.session else {
                    return;
                };
                if self.active.is_some() {
                    return;
                }
                let cancel = CancellationToken::new();
                let (paused_tx, paused_rx) = watch::channel(false);
                let mut sender = TransferSender::new(
                    session.transfer,
                    self.inbox.clone(),
                    paused_rx,
                    cancel.clone(),
                );
                let transport = Arc::clone(&self.transport);
                let request = session.request.clone();
                let task_cancel = cancel.clone();
                debug!(transfer = %session.transfer, url = %request.url, "Spawning transfer");

                tokio::spawn(async move {
                    let result = tokio::select! {
                        biased;
                        _ = task_cancel.cancelled() => Err(DownloadError::Cancelled),
                        result = transport.fetch(request, &mut sender) => result,
                    };
                    sender.finish(result);
                });

                self.active = Some(ActiveTransfer {
                    cancel,
                    paused: paused_tx,
                });
                self.state = DownloadState::Started;
            }
        }
    }

    pub fn pause(&mut self) {
        if self.state != DownloadState::Started {
            return;
        }
        if let Some(active) = &self.active {
            active.paused.send_replace(true);
            self.state = DownloadState::Paused;
        }
    }

    /// Tear down the transfer in flight. Its late deliveries are ignored.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.session = None;
        self.state = DownloadState::Stopped;
    }

    /// Apply a delivery from a worker. Stale deliveries yield nothing.
    pub fn apply(&mut self, message: TransferMessage) -> Vec<DownloadNotification> {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.transfer == message.transfer)
        else {
            trace!(transfer = %message.transfer, "Discarding delivery from superseded transfer");
            return Vec::new();
        };

        match message.event {
            TransferEvent::Response(info) => {
                session.total_size = info.total_size.map(|size| size as i64);
                session.expected_length = info.content_length.map(|len| len as i64);
                session.supports_range = info.supports_range();
                let notification = DownloadNotification::RangeSupport {
                    supports_range: session.supports_range,
                    total_size: session.total_size,
                };
                session.response = Some(info);
                vec![notification]
            }
            TransferEvent::Chunk(chunk) => {
                session.bytes_received += chunk.len() as i64;
                let progress = session.progress();
                vec![DownloadNotification::Data { chunk, progress }]
            }
            TransferEvent::Finished(Ok(())) => {
                debug!(transfer = %session.transfer, bytes = session.bytes_received, "Transfer completed");
                self.active = None;
                self.state = DownloadState::Completed;
                vec![DownloadNotification::Completed]
            }
            TransferEvent::Finished(Err(error)) if error.is_cancelled() => {
                trace!(transfer = %session.transfer, "Transfer cancelled locally");
                self.active = None;
                Vec::new()
            }
            TransferEvent::Finished(Err(error)) => {
                warn!(transfer = %session.transfer, error = %error, bytes = session.bytes_received, "Transfer failed");
                let bytes_staged = session.staged_before + session.bytes_received;
                let response = session.response.clone();
                self.active = None;
                self.state = DownloadState::CompletedWithError;
                vec![DownloadNotification::Failed {
                    error,
                    bytes_staged,
                    response,
                }]
            }
        }
    }
}
