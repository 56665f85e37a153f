use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

const DEFAULT_USER_AGENT: &str = concat!("tempo-engine/", env!("CARGO_PKG_VERSION"));

/// Default decoded buffer size, in frames.
pub const DEFAULT_READ_BUFFER_SIZE: u32 = 8192;

/// Default sample rate the reader decodes to.
pub const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

/// Configurable options for the HTTP downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for the entire HTTP request. Zero disables it.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Maximum idle time of a pooled connection
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            // audio files stream for minutes, only the connect phase is bounded
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            use_system_proxy: true,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> crate::builder::DownloaderConfigBuilder {
        crate::builder::DownloaderConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        // byte offsets must refer to the stored representation
        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("identity"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("audio/*, */*"));
        default_headers
    }
}

/// How the engine treats a remote file that is still being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPolicy {
    /// Play while downloading; seeking past the downloaded window restarts
    /// the transfer at a byte offset.
    #[default]
    Stream,
    /// Only report `ready` once the whole file is staged.
    Predownload,
    /// Play while downloading; seeking ahead waits for the transfer to get there.
    ProgressiveDownload,
}

/// Scheduling-loop tuning
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Frames per decoded buffer pulled from the reader
    pub read_buffer_size: u32,
    /// Sample rate the reader decodes to
    pub sample_rate: f64,
    /// Cap on buffers handed to the sink but not yet rendered
    pub max_outstanding_buffers: usize,
    /// Look-ahead buffers scheduled per tick at most
    pub buffers_per_tick: usize,
    /// Duration of the volume swell after play and seek
    pub volume_ramp: Duration,
    /// Chunk size used when reading local files
    pub local_chunk_size: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_outstanding_buffers: 100,
            buffers_per_tick: 4,
            volume_ramp: Duration::from_millis(500),
            local_chunk_size: 64 * 1024,
        }
    }
}

impl StreamerConfig {
    /// Playback length of one decoded buffer.
    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(self.read_buffer_size) / self.sample_rate)
    }

    /// Scheduling cadence: far ahead of consumption, never below 1ms.
    pub fn tick_interval(&self) -> Duration {
        (self.buffer_duration() / 200).max(Duration::from_millis(1))
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub downloader: DownloaderConfig,
    pub streamer: StreamerConfig,
    pub policy: DownloadPolicy,
}

impl EngineConfig {
    pub fn builder() -> crate::builder::EngineConfigBuilder {
        crate::builder::EngineConfigBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_interval_is_far_below_buffer_duration() {
        let config = StreamerConfig::default();
        let buffer = config.buffer_duration();
        assert!((buffer.as_secs_f64() - 8192.0 / 44_100.0).abs() < 1e-9);
        assert!(config.tick_interval() < buffer / 100);
        assert!(config.tick_interval() >= Duration::from_millis(1));
    }

    #[test]
    fn test_zero_sample_rate_does_not_panic() {
        let config = StreamerConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        assert_eq!(config.buffer_duration(), Duration::ZERO);
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_default_headers_request_identity_encoding() {
        let config = DownloaderConfig::default();
        assert_eq!(
            config.headers.get(reqwest::header::ACCEPT_ENCODING).unwrap(),
            "identity"
        );
        assert!(config.timeout.is_zero());
    }
}
