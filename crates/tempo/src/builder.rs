//! # Configuration builders
//!
//! Fluent construction of [`DownloaderConfig`] and of the whole
//! [`EngineConfig`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tempo_engine::{DownloadPolicy, EngineConfig};
//!
//! let config = EngineConfig::builder()
//!     .with_policy(DownloadPolicy::ProgressiveDownload)
//!     .with_read_buffer_size(4096)
//!     .with_downloader(|downloader| {
//!         downloader
//!             .with_connect_timeout(Duration::from_secs(15))
//!             .with_user_agent("MyPlayer/1.0")
//!             .with_header("X-Api-Key", "my-secret-key")
//!     })
//!     .build();
//! assert_eq!(config.downloader.user_agent, "MyPlayer/1.0");
//! assert_eq!(config.streamer.read_buffer_size, 4096);
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::config::{DownloadPolicy, EngineConfig};
use crate::DownloaderConfig;

/// Builder for [`DownloaderConfig`]
#[derive(Debug, Clone, Default)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on a whole request. Zero means none, which suits long tracks.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// How long an idle pooled connection is kept
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add one header on top of the defaults. Invalid names or values are
    /// logged and skipped.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let (name, value) = (name.as_ref(), value.as_ref());
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.config.headers.insert(name, value);
            }
            _ => warn!(header = name, "Skipping invalid request header"),
        }
        self
    }

    /// Replace every header, defaults included.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.config.use_system_proxy = use_system_proxy;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

/// Builder for [`EngineConfig`]: download policy, scheduling and the HTTP side.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: DownloadPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Frames per decoded buffer. Also sets the scheduling tick.
    pub fn with_read_buffer_size(mut self, frames: u32) -> Self {
        self.config.streamer.read_buffer_size = frames.max(1);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.streamer.sample_rate = sample_rate;
        self
    }

    /// Cap on buffers scheduled on the sink and not yet rendered.
    pub fn with_max_outstanding_buffers(mut self, buffers: usize) -> Self {
        self.config.streamer.max_outstanding_buffers = buffers.max(1);
        self
    }

    pub fn with_buffers_per_tick(mut self, buffers: usize) -> Self {
        self.config.streamer.buffers_per_tick = buffers.max(1);
        self
    }

    pub fn with_volume_ramp(mut self, ramp: Duration) -> Self {
        self.config.streamer.volume_ramp = ramp;
        self
    }

    pub fn with_local_chunk_size(mut self, bytes: usize) -> Self {
        self.config.streamer.local_chunk_size = bytes.max(1);
        self
    }

    /// Adjust the HTTP settings in place.
    pub fn with_downloader<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(DownloaderConfigBuilder) -> DownloaderConfigBuilder,
    {
        let builder = DownloaderConfigBuilder {
            config: std::mem::take(&mut self.config.downloader),
        };
        self.config.downloader = configure(builder).build();
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
