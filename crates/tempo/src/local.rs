//! Local files, fed through the same demuxer pipeline as downloads.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::DownloadError;
use crate::events::EngineMessage;

#[derive(Debug)]
pub enum LocalEvent {
    Opened { size: u64 },
    Chunk(Bytes),
    Finished(Result<(), DownloadError>),
}

/// Read `path` in `chunk_size` pieces on a worker task.
pub(crate) fn spawn_local_read(
    path: PathBuf,
    chunk_size: usize,
    generation: u64,
    inbox: mpsc::UnboundedSender<EngineMessage>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let send = |event| inbox.send(EngineMessage::Local { generation, event }).is_ok();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = read_file(&path, chunk_size.max(1), &send) => result,
        };
        if let Err(e) = &result {
            warn!(path = %path.display(), error = %e, "Local read failed");
        }
        send(LocalEvent::Finished(result));
    });
}

async fn read_file<F>(path: &Path, chunk_size: usize, send: &F) -> Result<(), DownloadError>
where
    F: Fn(LocalEvent) -> bool,
{
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    debug!(path = %path.display(), size, "Opened local file");
    if !send(LocalEvent::Opened { size }) {
        return Err(DownloadError::Cancelled);
    }

    loop {
        let mut buf = BytesMut::zeroed(chunk_size);
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        buf.truncate(n);
        if !send(LocalEvent::Chunk(buf.freeze())) {
            return Err(DownloadError::Cancelled);
        }
    }
}
