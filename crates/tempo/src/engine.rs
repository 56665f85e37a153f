//! # Player engine
//!
//! The owning context. [`PlayerEngine`] derives the observable
//! [`PlaybackState`] from its [`Streamer`], keeps the byte/time bookkeeping in
//! a [`StreamPosition`], turns download failures into [`ResumableData`], and
//! runs the silence-adaptive [`RateController`].
//!
//! Every mutation happens on the engine's own task. [`PlayerEngine::spawn`]
//! starts that task and returns a [`PlayerHandle`]; workers (transfers, local
//! reads, probes, sink callbacks) only ever talk to it through the inbox.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{DownloadPolicy, EngineConfig};
use crate::downloader::{HttpTransport, Transport, create_client};
use crate::events::{EngineEvent, EngineMessage, Observers, SubscriberId};
use crate::media::{AudioSink, DemuxerFactory, StreamFormat};
use crate::metadata::{Id3HeaderProbe, MetadataProbe, ProbeResult, ProbeSource, spawn_probe};
use crate::position::{SeekTarget, StreamPosition};
use crate::rate::{RateController, SilenceMode};
use crate::streamer::{Streamer, StreamerEvent, StreamingState};
use crate::{DownloadError, EngineError, ResumableData};

/// What observers are told about playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Undefined,
    Initializing,
    Ready,
    Playing,
    Paused,
    Ended,
    Failed,
}

/// Requests accepted by the engine task.
#[derive(Debug)]
pub enum Command {
    OpenRemote(Url),
    OpenLocal(PathBuf),
    Play,
    Pause,
    Stop,
    Resume,
    Seek(f64),
    SeekPercent(f64),
    SetVolume(f32),
    SetBaseRate(f32),
    SetPitch(f32),
    SetGlobalGain(f32),
    SetSilenceMode(SilenceMode),
    NoAssetNeeded(f64),
    Subscribe(
        mpsc::UnboundedSender<EngineEvent>,
        oneshot::Sender<SubscriberId>,
    ),
    Unsubscribe(SubscriberId),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown,
}

/// Point-in-time view of the engine for polling UIs.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: PlaybackState,
    pub url: Option<Url>,
    pub is_local: bool,
    pub current_time: f64,
    pub duration: f64,
    pub has_duration: f64,
    pub position: StreamPosition,
    pub time_offset: f64,
    pub supports_range: bool,
    pub file_downloaded: bool,
    pub has_error: bool,
    pub is_buffering: bool,
    pub is_waiting_for_downloader: bool,
    pub is_good_for_stream: bool,
    pub rate: f32,
    pub base_rate: f32,
    pub volume: f32,
    pub silence_mode: SilenceMode,
    pub resumable: Option<ResumableData>,
}

pub struct PlayerEngine {
    policy: DownloadPolicy,
    streamer: Streamer,
    probe: Arc<dyn MetadataProbe>,
    inbox: mpsc::UnboundedSender<EngineMessage>,
    observers: Observers,

    state: PlaybackState,
    url: Option<Url>,
    is_local: bool,
    position: StreamPosition,
    time_offset: f64,
    resumable: Option<ResumableData>,
    supports_range: bool,
    file_downloaded: bool,
    has_error: bool,
    initialized: bool,
    format: Option<StreamFormat>,
    good_for_stream: bool,

    current_time: f64,
    has_duration: f64,
    estimated_duration: f64,
    insider_duration: f64,
    needs_asset: bool,

    rate: RateController,
    reported_rate: f32,

    /// Bumped on every open and stop; probe results carry it.
    open_generation: u64,
    probe_task: Option<JoinHandle<()>>,
}

impl PlayerEngine {
    /// Engine plus the receiving end of its inbox.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn DemuxerFactory>,
        sink: Box<dyn AudioSink>,
        probe: Arc<dyn MetadataProbe>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineMessage>) {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let mut streamer = Streamer::new(config.streamer, transport, factory, sink, inbox.clone());
        streamer.set_progressive(config.policy == DownloadPolicy::ProgressiveDownload);

        let engine = Self {
            policy: config.policy,
            streamer,
            probe,
            inbox,
            observers: Observers::new(),
            state: PlaybackState::Undefined,
            url: None,
            is_local: false,
            position: StreamPosition::default(),
            time_offset: 0.0,
            resumable: None,
            supports_range: false,
            file_downloaded: false,
            has_error: false,
            initialized: false,
            format: None,
            good_for_stream: false,
            current_time: 0.0,
            has_duration: 0.0,
            estimated_duration: 0.0,
            insider_duration: 0.0,
            needs_asset: true,
            rate: RateController::default(),
            reported_rate: 1.0,
            open_generation: 0,
            probe_task: None,
        };
        (engine, receiver)
    }

    /// Run the engine on its own task.
    pub fn spawn(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn DemuxerFactory>,
        sink: Box<dyn AudioSink>,
        probe: Arc<dyn MetadataProbe>,
    ) -> PlayerHandle {
        let (engine, receiver) = Self::new(config, transport, factory, sink, probe);
        let inbox = engine.inbox.clone();
        let task = tokio::spawn(engine.run(receiver));
        PlayerHandle { inbox, task }
    }

    /// Spawn with the reqwest transport and the ID3 header probe sharing one client.
    pub fn spawn_http(
        config: EngineConfig,
        factory: Arc<dyn DemuxerFactory>,
        sink: Box<dyn AudioSink>,
    ) -> Result<PlayerHandle, DownloadError> {
        let client = create_client(&config.downloader)?;
        let transport = Arc::new(HttpTransport::new(client.clone()));
        let probe = Arc::new(Id3HeaderProbe::new(client));
        Ok(Self::spawn(config, transport, factory, sink, probe))
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<EngineMessage>) {
        let mut ticker = tokio::time::interval(self.streamer.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Player engine started");

        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(EngineMessage::Command(Command::Shutdown)) | None => break,
                    Some(message) => self.handle(message),
                },
                _ = ticker.tick() => {
                    if self.streamer.is_ticking() {
                        self.tick(Instant::now());
                    }
                }
            }
        }

        self.stop();
        info!("Player engine stopped");
    }

    /// Apply one inbox message.
    pub fn handle(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Transfer(message) => self.streamer.handle_transfer(message),
            EngineMessage::Local { generation, event } => self.streamer.handle_local(generation, event),
            EngineMessage::BufferConsumed { generation } => self.streamer.on_buffer_consumed(generation),
            EngineMessage::Loudness { generation, db } => self.on_loudness(generation, db),
            EngineMessage::Probed { generation, result } => self.on_probed(generation, result),
            EngineMessage::Command(command) => self.handle_command(command),
        }
        self.pump();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::OpenRemote(url) => self.open_remote(url),
            Command::OpenLocal(path) => self.open_local(path),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Resume => self.resume(),
            Command::Seek(time) => self.seek(time),
            Command::SeekPercent(percent) => self.seek_percent(percent),
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::SetBaseRate(rate) => self.set_base_rate(rate),
            Command::SetPitch(pitch) => self.set_pitch(pitch),
            Command::SetGlobalGain(gain) => {
                self.set_global_gain(gain);
            }
            Command::SetSilenceMode(mode) => self.set_silence_mode(mode),
            Command::NoAssetNeeded(duration) => self.no_asset_needed(duration),
            Command::Subscribe(sender, reply) => {
                let id = self.observers.subscribe_channel(sender);
                let _ = reply.send(id);
            }
            Command::Unsubscribe(id) => {
                self.observers.unsubscribe(id);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // handled by the run loop
            Command::Shutdown => {}
        }
    }

    /// One scheduling tick.
    pub fn tick(&mut self, now: Instant) {
        self.streamer.tick(now);
        self.pump();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> &StreamPosition {
        &self.position
    }

    pub fn resumable_data(&self) -> Option<&ResumableData> {
        self.resumable.as_ref()
    }

    pub fn is_file_downloaded(&self) -> bool {
        self.file_downloaded
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn supports_range(&self) -> bool {
        self.supports_range
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Longer of the parsed duration and the probe's estimate.
    pub fn duration(&self) -> f64 {
        self.has_duration.max(self.estimated_duration)
    }

    pub fn rate(&self) -> f32 {
        self.rate.rate()
    }

    pub fn streamer(&self) -> &Streamer {
        &self.streamer
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriberId
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.observers.emit(event);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "Playback state changed");
        self.state = state;
        if state == PlaybackState::Initializing {
            self.streamer.set_total_duration(0.0);
        }
        self.emit(EngineEvent::StateChanged(state));
    }

    /// Move the download restart point and recompute everything derived from it.
    fn set_offset(&mut self, offset: i64) {
        self.resumable = None;
        self.position.set_offset(offset);
        self.time_offset = self.position.time_offset();
        self.streamer.set_total_time_offset(self.time_offset);
        self.emit(EngineEvent::OffsetChanged(self.position.offset));
    }

    fn mark_file_downloaded(&mut self) {
        if !self.file_downloaded {
            info!(url = ?self.url, "File fully downloaded");
        }
        self.file_downloaded = true;
        self.resumable = None;
        if self.policy == DownloadPolicy::Predownload {
            self.set_state(PlaybackState::Ready);
        }
    }

    fn set_format(&mut self, format: StreamFormat) {
        self.format = Some(format);
        self.promote_to_ready();
    }

    fn promote_to_ready(&mut self) {
        if self.initialized
            && self.format.is_some()
            && self.state == PlaybackState::Initializing
            && self.policy != DownloadPolicy::Predownload
        {
            self.set_state(PlaybackState::Ready);
        }
    }

    fn apply_rate(&mut self, rate: f32) {
        self.streamer.set_rate(rate);
        if rate != self.reported_rate {
            self.reported_rate = rate;
            self.emit(EngineEvent::RateChanged(rate));
        }
    }

    fn reset_rate(&mut self) {
        let rate = self.rate.reset();
        self.apply_rate(rate);
    }

    fn begin_open(&mut self, source: ProbeSource) {
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }
        self.open_generation += 1;
        self.position = StreamPosition::default();
        self.set_offset(0);
        self.initialized = false;
        self.format = None;
        self.has_error = false;
        self.supports_range = false;
        self.good_for_stream = false;
        self.current_time = 0.0;
        self.has_duration = 0.0;
        self.estimated_duration = 0.0;
        self.reset_rate();
        self.set_state(PlaybackState::Initializing);

        let needs_asset = std::mem::replace(&mut self.needs_asset, true);
        self.probe_task = Some(spawn_probe(
            Arc::clone(&self.probe),
            source,
            needs_asset,
            self.open_generation,
            self.inbox.clone(),
        ));
    }

    #[instrument(skip(self), level = "debug")]
    pub fn open_remote(&mut self, url: Url) {
        info!(url = %url, policy = ?self.policy, "Opening remote track");
        self.is_local = false;
        self.file_downloaded = false;
        self.url = Some(url.clone());
        self.begin_open(ProbeSource::Remote(url.clone()));
        self.streamer.open_remote(url);
        self.pump();
    }

    #[instrument(skip(self), level = "debug")]
    pub fn open_local(&mut self, path: PathBuf) {
        info!(path = %path.display(), "Opening local track");
        self.is_local = true;
        self.url = std::path::absolute(&path)
            .ok()
            .and_then(|absolute| Url::from_file_path(absolute).ok());
        self.begin_open(ProbeSource::Local(path.clone()));
        self.file_downloaded = true;
        self.streamer.open_local(path);
        self.pump();
    }

    /// Supply a known duration; the probe then only looks for the header.
    /// Applies to the next open, or to the probe in flight.
    pub fn no_asset_needed(&mut self, duration: f64) {
        self.insider_duration = duration;
        if duration > 0.0 {
            self.needs_asset = false;
        }
    }

    pub fn play(&mut self) {
        if self.has_error {
            self.resume();
        }
        self.streamer.play();
        self.pump();
    }

    pub fn pause(&mut self) {
        self.streamer.pause();
        self.pump();
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }
        self.open_generation += 1;
        self.streamer.stop();
        self.pump();
    }

    /// Retry the download after a failure.
    pub fn resume(&mut self) {
        if self.file_downloaded {
            return;
        }
        let Some(url) = self.url.clone() else {
            return;
        };
        if self.policy == DownloadPolicy::ProgressiveDownload {
            self.resumable = None;
            self.set_offset(0);
        }

        match self.resumable.take() {
            Some(resumable) => {
                info!(url = %url, resume_point = resumable.resume_point(), "Resuming download");
                self.streamer.resume(&resumable);
            }
            None if self.position.offset > 0 && self.supports_range => {
                let offset = self.position.offset;
                info!(url = %url, offset, "Restarting download at offset");
                // the refetch starts at the offset again, so parsing must too
                self.streamer.reset();
                self.position.has_bytes = 0;
                self.set_offset(offset);
                self.streamer.resume(&ResumableData::at_offset(offset));
            }
            None => {
                info!(url = %url, "Restarting download from the beginning");
                if self.position.offset != 0 {
                    self.set_offset(0);
                }
                self.position.has_bytes = 0;
                self.streamer.open_remote(url);
            }
        }
        self.pump();
    }

    /// Start over at the current offset, keeping play/pause.
    pub fn restart(&mut self) {
        let was_playing = self.streamer.state() == StreamingState::Playing;
        self.streamer.reset();
        self.pump();
        self.resume();
        if was_playing {
            self.streamer.play();
        }
        self.pump();
    }

    /// Seek to `time`, relative to the current download offset.
    pub fn seek(&mut self, time: f64) {
        self.reset_rate();
        if let Err(e) = self.streamer.seek(time, false) {
            warn!(time, error = %e, "Seek failed");
        }
        self.pump();
    }

    /// Seek to a fraction of the whole file.
    #[instrument(skip(self), level = "debug")]
    pub fn seek_percent(&mut self, percent: f64) {
        self.reset_rate();
        if !(0.0..=1.0).contains(&percent) {
            return;
        }

        if self.file_downloaded {
            if self.position.offset != 0 {
                self.set_offset(0);
            }
            self.seek(self.has_duration * percent);
            return;
        }

        if let SeekTarget::Within { time } = self.position.byte_window_to_time(percent, self.has_duration) {
            if self.policy == DownloadPolicy::ProgressiveDownload {
                self.streamer.clear_pending_seek();
            }
            self.seek(time);
            return;
        }

        if percent == 1.0 {
            info!("Seek to end");
            self.set_offset(self.position.header_size);
            self.mark_file_downloaded();
            if let Err(e) = self.streamer.seek(0.0, true) {
                warn!(error = %e, "Rewind failed");
            }
            self.streamer.stop();
            self.pump();
            self.set_state(PlaybackState::Ended);
            return;
        }

        match self.policy {
            DownloadPolicy::Stream if !self.supports_range => {
                debug!(percent, "No range support, seeking to the end of what is staged");
                self.seek(self.has_duration);
            }
            DownloadPolicy::Stream => {
                let offset = self.position.percent_to_byte_offset(percent);
                info!(percent, offset, "Restarting download at byte offset");
                self.set_offset(offset);
                self.resumable = Some(ResumableData::at_offset(offset));
                self.restart();
            }
            DownloadPolicy::Predownload => self.seek(0.0),
            DownloadPolicy::ProgressiveDownload => {
                self.streamer.set_pending_seek(self.duration() * percent, percent);
                self.pump();
            }
        }
    }

    pub fn volume(&self) -> f32 {
        self.streamer.volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.streamer.set_volume(volume);
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.streamer.set_pitch(pitch);
    }

    pub fn set_base_rate(&mut self, base_rate: f32) {
        let rate = self.rate.set_base_rate(base_rate);
        self.apply_rate(rate);
    }

    pub fn set_silence_mode(&mut self, mode: SilenceMode) {
        let rate = self.rate.set_mode(mode);
        self.apply_rate(rate);
    }

    /// Returns `false` when `gain` is outside [-96, 24] dB.
    pub fn set_global_gain(&mut self, gain: f32) -> bool {
        if !self.rate.set_global_gain(gain) {
            debug!(gain, "Ignoring out-of-range global gain");
            return false;
        }
        self.streamer.set_global_gain(gain);
        let rate = self.rate.rate();
        self.apply_rate(rate);
        true
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            url: self.url.clone(),
            is_local: self.is_local,
            current_time: self.current_time,
            duration: self.duration(),
            has_duration: self.has_duration,
            position: self.position,
            time_offset: self.time_offset,
            supports_range: self.supports_range,
            file_downloaded: self.file_downloaded,
            has_error: self.has_error,
            is_buffering: self.streamer.is_buffering(),
            is_waiting_for_downloader: self.streamer.is_waiting_for_downloader(),
            is_good_for_stream: self.good_for_stream,
            rate: self.rate.rate(),
            base_rate: self.rate.base_rate(),
            volume: self.streamer.volume(),
            silence_mode: self.rate.mode(),
            resumable: self.resumable.clone(),
        }
    }

    fn on_loudness(&mut self, generation: u64, db: Option<f32>) {
        if generation != self.streamer.sink_generation() || self.state != PlaybackState::Playing {
            return;
        }
        let seconds_per_buffer = self
            .format
            .filter(|format| format.sample_rate > 0.0)
            .map(|format| f64::from(self.streamer.config().read_buffer_size) / format.sample_rate);

        if let Some(decision) = self.rate.observe(db, seconds_per_buffer.unwrap_or(0.0)) {
            self.apply_rate(decision.rate);
            if let (Some(saved), Some(_)) = (decision.seconds_saved, seconds_per_buffer) {
                self.emit(EngineEvent::SecondsSaved(saved));
            }
        }
    }

    fn on_probed(&mut self, generation: u64, result: ProbeResult) {
        if generation != self.open_generation {
            debug!(generation, "Discarding stale probe result");
            return;
        }
        self.probe_task = None;

        self.good_for_stream = result.header_size.is_some();
        self.emit(EngineEvent::GoodForStream(self.good_for_stream));
        let duration = self.duration();
        self.position.set_header_size(result.header_size.unwrap_or(0), duration);

        let metadata = result.metadata.unwrap_or_default();
        if let Some(title) = metadata.title {
            self.emit(EngineEvent::Title(title));
        }
        if let Some(artist) = metadata.artist {
            self.emit(EngineEvent::Artist(artist));
        }
        if let Some(album) = metadata.album {
            self.emit(EngineEvent::Album(album));
        }
        if let Some(artwork) = metadata.artwork {
            self.emit(EngineEvent::Artwork(artwork));
        }

        let insider = std::mem::take(&mut self.insider_duration);
        self.estimated_duration = metadata.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(insider);
        self.streamer.set_total_duration(self.estimated_duration);
        self.position.set_total_size(self.position.total_size, self.duration());
        self.emit(EngineEvent::Duration(self.duration()));

        self.initialized = true;
        self.promote_to_ready();
    }

    /// Apply everything the streamer recorded, including events raised while
    /// handling earlier ones.
    fn pump(&mut self) {
        loop {
            let events = self.streamer.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.on_streamer_event(event);
            }
        }
    }

    fn on_streamer_event(&mut self, event: StreamerEvent) {
        match event {
            StreamerEvent::StateChanged(state) => {
                self.reset_rate();
                match state {
                    StreamingState::Paused => self.set_state(PlaybackState::Paused),
                    StreamingState::Playing => self.set_state(PlaybackState::Playing),
                    StreamingState::Stopped => {
                        if self.initialized
                            && self.format.is_some()
                            && self.policy != DownloadPolicy::Predownload
                        {
                            self.set_state(PlaybackState::Ready);
                        }
                    }
                }
                if state == StreamingState::Playing {
                    self.streamer.install_loudness_tap();
                } else {
                    self.streamer.remove_loudness_tap();
                }
            }
            StreamerEvent::RangeSupport {
                supports_range,
                total_size,
            } => {
                if let Some(total) = total_size
                    && self.position.total_size < total
                {
                    let duration = self.duration();
                    self.position.set_total_size(total, duration);
                }
                self.supports_range = supports_range;
                self.emit(EngineEvent::RangeSupport {
                    supports_range,
                    total_size: self.position.total_size,
                });
            }
            StreamerEvent::DownloadProgress { progress, bytes } => {
                self.has_error = false;
                let duration = self.duration();
                self.position.add_bytes(bytes, duration);
                if progress == 1.0
                    && (self.position.offset == 0 || self.position.offset == self.position.header_size)
                {
                    self.mark_file_downloaded();
                }
                if progress >= 0.0
                    && self.position.total_size > 0
                    && let Some(url) = self.url.clone()
                {
                    let total_progress = self.position.has_bytes as f32 / self.position.total_size as f32;
                    self.emit(EngineEvent::DownloadProgress {
                        url,
                        total_progress,
                        task_progress: progress,
                    });
                }
                self.emit(EngineEvent::Duration(self.duration()));
            }
            StreamerEvent::DownloadCompleted => {
                if self.position.offset == 0 || self.position.offset == self.position.header_size {
                    self.mark_file_downloaded();
                }
            }
            StreamerEvent::DownloadFailed {
                error,
                bytes_staged,
                response,
            } => {
                warn!(url = ?self.url, error = %error, bytes_staged, "Download failed");
                self.has_error = true;
                self.resumable = response.and_then(|response| {
                    ResumableData::from_failure(self.position.offset, &response, bytes_staged)
                        .filter(|data| data.is_valid_for(self.position.total_size))
                });
                if let Some(url) = self.url.clone() {
                    self.emit(EngineEvent::DownloadFailed {
                        url,
                        error: error.to_string(),
                    });
                }
            }
            StreamerEvent::FormatAvailable(format) => self.set_format(format),
            StreamerEvent::Duration(duration) => {
                self.has_duration = duration;
                self.emit(EngineEvent::Duration(self.duration()));
            }
            StreamerEvent::CurrentTime(time) => {
                self.current_time = time + self.time_offset;
                self.emit(EngineEvent::CurrentTime(self.current_time));
            }
            StreamerEvent::Buffering(buffering) => self.emit(EngineEvent::Buffering(buffering)),
            StreamerEvent::WaitingForDownloader(waiting) => {
                self.emit(EngineEvent::WaitingForDownloader(waiting))
            }
            StreamerEvent::FileFinished => {
                self.current_time = self.time_offset;
                self.set_state(PlaybackState::Ended);
            }
            StreamerEvent::Failure(kind) => {
                self.emit(EngineEvent::Failure(kind));
                self.set_state(PlaybackState::Failed);
            }
        }
    }
}

/// Async front of a spawned [`PlayerEngine`].
#[derive(Debug)]
pub struct PlayerHandle {
    inbox: mpsc::UnboundedSender<EngineMessage>,
    task: JoinHandle<()>,
}

impl PlayerHandle {
    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.inbox
            .send(EngineMessage::Command(command))
            .map_err(|_| EngineError::Closed)
    }

    pub fn open_remote(&self, url: &str) -> Result<(), EngineError> {
        let url = Url::parse(url).map_err(|e| EngineError::UrlError(e.to_string()))?;
        self.send(Command::OpenRemote(url))
    }

    pub fn open_local(&self, path: impl Into<PathBuf>) -> Result<(), EngineError> {
        self.send(Command::OpenLocal(path.into()))
    }

    pub fn play(&self) -> Result<(), EngineError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.send(Command::Resume)
    }

    pub fn seek(&self, time: f64) -> Result<(), EngineError> {
        self.send(Command::Seek(time))
    }

    pub fn seek_percent(&self, percent: f64) -> Result<(), EngineError> {
        self.send(Command::SeekPercent(percent))
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.send(Command::SetVolume(volume))
    }

    pub fn set_base_rate(&self, rate: f32) -> Result<(), EngineError> {
        self.send(Command::SetBaseRate(rate))
    }

    pub fn set_pitch(&self, pitch: f32) -> Result<(), EngineError> {
        self.send(Command::SetPitch(pitch))
    }

    pub fn set_global_gain(&self, gain: f32) -> Result<(), EngineError> {
        self.send(Command::SetGlobalGain(gain))
    }

    pub fn set_silence_mode(&self, mode: SilenceMode) -> Result<(), EngineError> {
        self.send(Command::SetSilenceMode(mode))
    }

    pub fn no_asset_needed(&self, duration: f64) -> Result<(), EngineError> {
        self.send(Command::NoAssetNeeded(duration))
    }

    /// Receive every event from now on.
    pub async fn subscribe(
        &self,
    ) -> Result<(SubscriberId, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Subscribe(events_tx, reply_tx))?;
        let id = reply_rx.await.map_err(|_| EngineError::Closed)?;
        Ok((id, events_rx))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), EngineError> {
        self.send(Command::Unsubscribe(id))
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| EngineError::Closed)
    }

    /// Stop playback and wait for the engine task to finish.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.send(Command::Shutdown)?;
        self.task.await.map_err(|_| EngineError::Closed)
    }
}
