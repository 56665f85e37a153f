//! Track metadata probing.
//!
//! Probes run on a worker task next to the download. Their result is tagged
//! with the open generation it was started for and dropped if the engine has
//! moved on since.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::DownloadError;
use crate::events::EngineMessage;

/// Bytes requested to look for a tag header.
const PROBE_LIMIT: u64 = 1000;

const ID3_HEADER_LEN: usize = 10;

/// What to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSource {
    Remote(Url),
    Local(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<Bytes>,
    /// Container duration estimate in seconds
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResult {
    pub metadata: Option<TrackMetadata>,
    /// Size of the tag prelude in front of the audio payload. `None` when it
    /// could not be determined, which makes byte-offset seeking unreliable.
    pub header_size: Option<i64>,
}

/// Looks at the start of a track before or while it is downloaded.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    /// `needs_asset` is false when the caller already knows the duration and
    /// only the header size is wanted.
    async fn probe(&self, source: &ProbeSource, needs_asset: bool) -> ProbeResult;
}

/// Probe that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

#[async_trait]
impl MetadataProbe for NoopProbe {
    async fn probe(&self, _source: &ProbeSource, _needs_asset: bool) -> ProbeResult {
        ProbeResult::default()
    }
}

/// Finds the size of a leading ID3v2 tag. Tags are not decoded.
#[derive(Debug, Clone)]
pub struct Id3HeaderProbe {
    client: Client,
}

impl Id3HeaderProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn head_bytes(&self, source: &ProbeSource) -> Result<Vec<u8>, DownloadError> {
        match source {
            ProbeSource::Local(path) => {
                let file = tokio::fs::File::open(path).await?;
                let mut head = Vec::with_capacity(ID3_HEADER_LEN);
                file.take(ID3_HEADER_LEN as u64).read_to_end(&mut head).await?;
                Ok(head)
            }
            ProbeSource::Remote(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .header(reqwest::header::RANGE, format!("bytes=0-{PROBE_LIMIT}"))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(DownloadError::StatusCode(response.status()));
                }

                // servers that ignore the range would send the whole file
                let mut head = Vec::with_capacity(ID3_HEADER_LEN);
                let mut stream = response.bytes_stream();
                while head.len() < ID3_HEADER_LEN {
                    match stream.next().await {
                        Some(chunk) => head.extend_from_slice(&chunk?),
                        None => break,
                    }
                }
                Ok(head)
            }
        }
    }
}

#[async_trait]
impl MetadataProbe for Id3HeaderProbe {
    #[instrument(skip(self), level = "debug")]
    async fn probe(&self, source: &ProbeSource, _needs_asset: bool) -> ProbeResult {
        match self.head_bytes(source).await {
            Ok(head) => {
                let header_size = id3_header_size(&head);
                debug!(?header_size, "Probed tag header");
                ProbeResult {
                    metadata: None,
                    header_size,
                }
            }
            Err(e) => {
                warn!(error = %e, "Tag probe failed");
                ProbeResult::default()
            }
        }
    }
}

/// Total size of an ID3v2 tag, footer included; `Some(0)` when there is none.
pub fn id3_header_size(head: &[u8]) -> Option<i64> {
    if head.len() < ID3_HEADER_LEN {
        return None;
    }
    let major = head[3];
    if &head[..3] != b"ID3" || major > 4 || major < 2 {
        return Some(0);
    }
    let size = head[6..10]
        .iter()
        .fold(0i64, |acc, &b| (acc << 7) | i64::from(b & 0x7f));
    let footer = if major == 4 && head[5] & 0x10 != 0 {
        ID3_HEADER_LEN as i64
    } else {
        0
    };
    Some(ID3_HEADER_LEN as i64 + size + footer)
}

pub(crate) fn spawn_probe(
    probe: Arc<dyn MetadataProbe>,
    source: ProbeSource,
    needs_asset: bool,
    generation: u64,
    inbox: mpsc::UnboundedSender<EngineMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = probe.probe(&source, needs_asset).await;
        // the engine may have shut down meanwhile
        let _ = inbox.send(EngineMessage::Probed { generation, result });
    })
}
