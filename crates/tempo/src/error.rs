use reqwest::StatusCode;

/// Transport-level failures of a single transfer.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Server returned status code {0}")]
    StatusCode(StatusCode),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server answered a range request with the full resource")]
    RangeIgnored,

    /// The transfer was torn down locally (stop, new URL, resume).
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Generic download error: {0}")]
    Generic(String),
}

impl DownloadError {
    /// Local cancellations are never surfaced to observers.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

/// Errors reported by the demuxer / packet reader boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to create demuxer: {0}")]
    CreateDemuxer(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Failed to create reader: {0}")]
    CreateReader(String),

    #[error("Seek error: {0}")]
    Seek(String),
}

/// Outcome of a reader pull that produced no buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Normal terminal condition, not a failure.
    #[error("Reached end of file")]
    ReachedEndOfFile,

    /// Routine: the parser has not seen enough bytes yet.
    #[error("Not enough data")]
    NotEnoughData,

    #[error("Read error: {0}")]
    Other(String),
}

/// Errors raised by the audio sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Audio engine could not start: {0}")]
    Start(String),

    #[error("Buffer could not be scheduled: {0}")]
    Schedule(String),
}

/// Fatal, non-retried failures of the current playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EngineStart,
    ScheduleBuffer,
    CreateParser,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::EngineStart => "engineStart",
            FailureKind::ScheduleBuffer => "scheduleBuffer",
            FailureKind::CreateParser => "createParser",
        };
        f.write_str(name)
    }
}

/// Errors returned by the async player handle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine task has shut down")]
    Closed,

    #[error("Invalid URL: {0}")]
    UrlError(String),
}
