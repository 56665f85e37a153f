//! # Tempo
//!
//! A progressive audio streaming engine: starts playback while the file is
//! still arriving, survives dropped connections by resuming with HTTP range
//! requests, and can seek into parts of the file that were never fetched by
//! restarting the download at the matching byte.
//!
//! ## Features
//!
//! - Resumable HTTP downloads driven by a pluggable [`downloader::Transport`]
//! - Byte/time bookkeeping for downloads that start mid-file
//! - Bounded-lookahead scheduling of decoded buffers into an [`media::AudioSink`]
//! - Silence-adaptive playback rate
//! - Stream, predownload and progressive download policies
//!
//! Decoding and audio output stay outside the crate, behind
//! [`media::DemuxerFactory`] and [`media::AudioSink`].

pub mod builder;
pub mod config;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod events;
pub mod local;
pub mod media;
pub mod metadata;
pub mod position;
pub mod rate;
pub mod resumable;
pub mod streamer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{DownloaderConfigBuilder, EngineConfigBuilder};
pub use config::{DownloadPolicy, DownloaderConfig, EngineConfig, StreamerConfig};
pub use error::{DownloadError, EngineError, FailureKind, MediaError, ReadError, SinkError};
pub use resumable::ResumableData;

// Owning context
pub use engine::{Command, EngineSnapshot, PlaybackState, PlayerEngine, PlayerHandle};
pub use events::{EngineEvent, SubscriberId};

// Collaborators
pub use downloader::{HttpTransport, Transport, create_client};
pub use media::{AudioSink, Demuxer, DemuxerFactory, PacketReader, PcmBuffer, StreamFormat};
pub use metadata::{Id3HeaderProbe, MetadataProbe, NoopProbe, ProbeResult, TrackMetadata};

pub use position::StreamPosition;
pub use rate::{RateController, SilenceMode};
