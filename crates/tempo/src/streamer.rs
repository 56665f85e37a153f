//! # Streamer
//!
//! Drives one stream from bytes to the audio sink: owns the [`Downloader`] (or
//! the local file read), feeds the demuxer, and on every tick pulls decoded
//! buffers from the reader into the sink, a few at a time, with a cap on how
//! many may be outstanding.
//!
//! The streamer does not report anything directly. It records
//! [`StreamerEvent`]s which the owner drains with [`Streamer::take_events`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::StreamerConfig;
use crate::downloader::{DownloadNotification, Downloader, ResponseInfo, TransferMessage, Transport};
use crate::events::EngineMessage;
use crate::local::{LocalEvent, spawn_local_read};
use crate::media::{AudioSink, Demuxer, DemuxerFactory, PacketReader, StreamFormat};
use crate::rate::{GLOBAL_GAIN_RANGE, channel_loudness_db};
use crate::{DownloadError, FailureKind, MediaError, ReadError, ResumableData};

const VOLUME_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Observations recorded for the owner.
#[derive(Debug)]
pub enum StreamerEvent {
    StateChanged(StreamingState),
    RangeSupport {
        supports_range: bool,
        total_size: Option<i64>,
    },
    /// A chunk reached the demuxer. `progress` is the transfer's, negative if unknown.
    DownloadProgress { progress: f32, bytes: i64 },
    DownloadCompleted,
    DownloadFailed {
        error: DownloadError,
        bytes_staged: i64,
        response: Option<ResponseInfo>,
    },
    FormatAvailable(StreamFormat),
    Duration(f64),
    CurrentTime(f64),
    Buffering(bool),
    WaitingForDownloader(bool),
    /// Playback reached the end and was rewound.
    FileFinished,
    Failure(FailureKind),
}

/// Seek armed until the download gets far enough.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSeek {
    pub time: f64,
    pub wait_for_progress: f64,
}

#[derive(Debug, Clone, Copy)]
struct VolumeRamp {
    target: f32,
    hold_until: Instant,
    step_every: Duration,
    next_step: Option<Instant>,
}

enum Source {
    None,
    Remote,
    Local {
        cancel: CancellationToken,
        size: Option<u64>,
        read: u64,
    },
}

pub struct Streamer {
    config: StreamerConfig,
    downloader: Downloader,
    factory: Arc<dyn DemuxerFactory>,
    sink: Box<dyn AudioSink>,
    inbox: mpsc::UnboundedSender<EngineMessage>,

    url: Option<Url>,
    source: Source,
    /// Bumped on every reset; local reads from older generations are ignored.
    source_generation: u64,
    demuxer: Option<Box<dyn Demuxer>>,
    reader: Option<Box<dyn PacketReader>>,
    format: Option<StreamFormat>,

    state: StreamingState,
    duration: Option<f64>,
    total_duration: f64,
    total_time_offset: f64,
    current_time_offset: f64,
    scheduling_complete: bool,
    end_reported: bool,

    /// Buffers handed to the sink and not yet rendered
    outstanding: usize,
    /// Bumped whenever the sink drops its queue; completions carry it.
    sink_generation: u64,
    loudness_tap: bool,

    buffering: bool,
    waiting_for_downloader: bool,
    progressive: bool,
    pending_seek: Option<PendingSeek>,
    volume_ramp: Option<VolumeRamp>,

    events: Vec<StreamerEvent>,
}

impl Streamer {
    pub fn new(
        config: StreamerConfig,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn DemuxerFactory>,
        sink: Box<dyn AudioSink>,
        inbox: mpsc::UnboundedSender<EngineMessage>,
    ) -> Self {
        Self {
            downloader: Downloader::new(transport, inbox.clone()),
            config,
            factory,
            sink,
            inbox,
            url: None,
            source: Source::None,
            source_generation: 0,
            demuxer: None,
            reader: None,
            format: None,
            state: StreamingState::Stopped,
            duration: None,
            total_duration: 0.0,
            total_time_offset: 0.0,
            current_time_offset: 0.0,
            scheduling_complete: false,
            end_reported: false,
            outstanding: 0,
            sink_generation: 0,
            loudness_tap: false,
            buffering: false,
            waiting_for_downloader: false,
            progressive: false,
            pending_seek: None,
            volume_ramp: None,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn state(&self) -> StreamingState {
        self.state
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, Source::Local { .. })
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Duration the demuxer knows of, for the bytes staged since the last reset.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn total_time_offset(&self) -> f64 {
        self.total_time_offset
    }

    /// Time the current download offset corresponds to.
    pub fn set_total_time_offset(&mut self, offset: f64) {
        self.total_time_offset = offset;
    }

    /// Externally known duration of the whole track.
    pub fn set_total_duration(&mut self, duration: f64) {
        self.total_duration = duration;
    }

    pub fn set_progressive(&mut self, progressive: bool) {
        self.progressive = progressive;
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn is_waiting_for_downloader(&self) -> bool {
        self.waiting_for_downloader
    }

    pub fn pending_seek(&self) -> Option<PendingSeek> {
        self.pending_seek
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn sink_generation(&self) -> u64 {
        self.sink_generation
    }

    pub fn is_scheduling_complete(&self) -> bool {
        self.scheduling_complete
    }

    pub fn is_ticking(&self) -> bool {
        self.state != StreamingState::Stopped
    }

    pub fn take_events(&mut self) -> Vec<StreamerEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: StreamerEvent) {
        self.events.push(event);
    }

    fn set_state(&mut self, state: StreamingState) {
        self.state = state;
        self.emit(StreamerEvent::StateChanged(state));
    }

    /// Playback time: sink render position plus the offset of the last seek.
    pub fn current_time(&self) -> f64 {
        self.sink.render_position().unwrap_or(0.0) + self.current_time_offset
    }

    /// Stop everything and start over with a fresh demuxer.
    pub fn reset(&mut self) {
        debug!("Resetting streamer");
        self.stop();
        if let Source::Local { cancel, .. } = &self.source {
            cancel.cancel();
        }
        self.source = Source::None;
        self.source_generation += 1;
        self.current_time_offset = 0.0;
        self.duration = None;
        self.reader = None;
        self.format = None;
        self.scheduling_complete = false;
        self.end_reported = false;
        self.pending_seek = None;
        self.set_buffering(false);
        self.set_waiting(false);

        self.demuxer = match self.factory.create() {
            Ok(demuxer) => Some(demuxer),
            Err(e) => {
                error!(error = %e, "Failed to create demuxer");
                self.emit(StreamerEvent::Failure(FailureKind::CreateParser));
                None
            }
        };
    }

    pub fn open_remote(&mut self, url: Url) {
        self.reset();
        info!(url = %url, "Opening remote stream");
        self.url = Some(url.clone());
        self.source = Source::Remote;
        self.downloader.open(url);
    }

    pub fn open_local(&mut self, path: PathBuf) {
        self.reset();
        info!(path = %path.display(), "Opening local file");
        self.url = None;
        let cancel = CancellationToken::new();
        spawn_local_read(
            path,
            self.config.local_chunk_size,
            self.source_generation,
            self.inbox.clone(),
            cancel.clone(),
        );
        self.source = Source::Local {
            cancel,
            size: None,
            read: 0,
        };
    }

    /// Continue an interrupted download. The demuxer keeps its state.
    pub fn resume(&mut self, resumable: &ResumableData) {
        if self.is_local() || self.url.is_none() {
            return;
        }
        self.source = Source::Remote;
        self.downloader.resume(resumable);
    }

    pub fn play(&mut self) {
        if self.sink.is_playing() {
            return;
        }
        if !self.sink.is_running()
            && let Err(e) = self.sink.start()
        {
            error!(error = %e, "Failed to start audio sink");
            self.emit(StreamerEvent::Failure(FailureKind::EngineStart));
            return;
        }

        let last_volume = self.ramp_target();
        self.sink.set_volume(0.0);
        self.sink.play();
        self.swell_volume(last_volume, Instant::now());
        self.set_state(StreamingState::Playing);
    }

    pub fn pause(&mut self) {
        if !self.sink.is_playing() {
            return;
        }
        self.sink.pause();
        self.set_state(StreamingState::Paused);
    }

    pub fn stop(&mut self) {
        self.downloader.stop();
        self.drop_scheduled();
        self.sink.shutdown();
        self.set_state(StreamingState::Stopped);
    }

    /// Stop the sink's player; queued buffers and their completions are void.
    fn drop_scheduled(&mut self) {
        self.sink.stop();
        self.outstanding = 0;
        self.sink_generation += 1;
        // the tap tags its reports with the generation it was installed under
        if self.loudness_tap {
            self.install_loudness_tap();
        }
    }

    /// Reposition the reader to `time`, relative to the current download offset.
    ///
    /// Returns `Ok(false)` when the stream cannot be positioned yet. Internal
    /// seeks restore the volume at once instead of swelling it.
    pub fn seek(&mut self, time: f64, internal: bool) -> Result<bool, MediaError> {
        debug!(time, internal, "Seeking");
        let (Some(demuxer), Some(_)) = (&self.demuxer, &self.reader) else {
            return Ok(false);
        };
        let Some(packet) = demuxer
            .frame_offset(time)
            .and_then(|frame| demuxer.packet_offset(frame))
        else {
            debug!(time, "No packet for seek time yet");
            return Ok(false);
        };

        self.current_time_offset = time;
        self.scheduling_complete = false;
        self.end_reported = false;

        let was_playing = self.sink.is_playing();
        let last_volume = self.ramp_target();
        self.drop_scheduled();
        self.sink.set_volume(0.0);

        if let Some(reader) = self.reader.as_mut()
            && let Err(e) = reader.seek(packet)
        {
            warn!(error = %e, packet, "Reader failed to seek");
            self.sink.set_volume(last_volume);
            return Err(e);
        }

        if was_playing {
            self.sink.play();
        }
        self.emit(StreamerEvent::CurrentTime(time));

        if internal {
            self.volume_ramp = None;
            self.sink.set_volume(last_volume);
        } else {
            self.swell_volume(last_volume, Instant::now());
        }
        Ok(true)
    }

    /// Arm a seek that runs once the transfer reaches `wait_for_progress`.
    pub fn set_pending_seek(&mut self, time: f64, wait_for_progress: f64) {
        debug!(time, wait_for_progress, "Waiting for downloader before seeking");
        self.pending_seek = Some(PendingSeek {
            time,
            wait_for_progress,
        });
        self.set_waiting(true);
    }

    pub fn clear_pending_seek(&mut self) {
        self.pending_seek = None;
        self.set_waiting(false);
    }

    fn ramp_target(&self) -> f32 {
        self.volume_ramp
            .map_or_else(|| self.sink.volume(), |ramp| ramp.target)
    }

    /// Ramp back to `target` in small steps, starting after half the ramp.
    fn swell_volume(&mut self, target: f32, now: Instant) {
        if target <= 0.0 {
            self.volume_ramp = None;
            self.sink.set_volume(target);
            return;
        }
        let half = self.config.volume_ramp / 2;
        let steps = (target / VOLUME_STEP).ceil().max(1.0) as u32;
        self.volume_ramp = Some(VolumeRamp {
            target,
            hold_until: now + half,
            step_every: half / steps,
            next_step: None,
        });
    }

    fn step_volume(&mut self, now: Instant) {
        let Some(mut ramp) = self.volume_ramp else {
            return;
        };
        if now < ramp.hold_until || ramp.next_step.is_some_and(|next| now < next) {
            return;
        }
        let volume = (self.sink.volume() + VOLUME_STEP).min(ramp.target);
        self.sink.set_volume(volume);
        if volume >= ramp.target {
            self.volume_ramp = None;
        } else {
            ramp.next_step = Some(now + ramp.step_every);
            self.volume_ramp = Some(ramp);
        }
    }

    pub fn volume(&self) -> f32 {
        self.ramp_target()
    }

    pub fn set_volume(&mut self, volume: f32) {
        if let Some(ramp) = self.volume_ramp.as_mut() {
            ramp.target = volume;
        } else {
            self.sink.set_volume(volume);
        }
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.sink.set_rate(rate);
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.sink.set_pitch(pitch);
    }

    /// Ignored outside [-96, 24] dB.
    pub fn set_global_gain(&mut self, gain: f32) -> bool {
        if !GLOBAL_GAIN_RANGE.contains(&gain) {
            return false;
        }
        self.sink.set_global_gain(gain);
        true
    }

    /// Report channel-0 loudness of every rendered buffer to the inbox.
    pub fn install_loudness_tap(&mut self) {
        let inbox = self.inbox.clone();
        let generation = self.sink_generation;
        self.sink.install_tap(Box::new(move |buffer| {
            let db = buffer.channel(0).and_then(channel_loudness_db);
            let _ = inbox.send(EngineMessage::Loudness { generation, db });
        }));
        self.loudness_tap = true;
    }

    pub fn remove_loudness_tap(&mut self) {
        self.sink.remove_tap();
        self.loudness_tap = false;
    }

    /// The sink rendered a buffer.
    pub fn on_buffer_consumed(&mut self, generation: u64) {
        if generation != self.sink_generation {
            trace!(generation, "Ignoring completion of a dropped buffer");
            return;
        }
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// One bounded unit of scheduling work.
    pub fn tick(&mut self, now: Instant) {
        if self.state == StreamingState::Stopped {
            return;
        }
        for _ in 0..self.config.buffers_per_tick {
            if !self.schedule_next_buffer() {
                break;
            }
        }
        self.handle_time_update();
        self.notify_time_updated();
        self.step_volume(now);
    }

    fn schedule_next_buffer(&mut self) -> bool {
        if self.scheduling_complete || self.outstanding >= self.config.max_outstanding_buffers {
            return false;
        }
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        match reader.read(self.config.read_buffer_size) {
            Ok(buffer) => {
                self.set_buffering(false);
                self.set_waiting(false);

                let inbox = self.inbox.clone();
                let generation = self.sink_generation;
                let scheduled = self.sink.schedule(
                    buffer,
                    Box::new(move || {
                        let _ = inbox.send(EngineMessage::BufferConsumed { generation });
                    }),
                );
                match scheduled {
                    Ok(()) => {
                        self.outstanding += 1;
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to schedule buffer");
                        self.emit(StreamerEvent::Failure(FailureKind::ScheduleBuffer));
                        false
                    }
                }
            }
            Err(ReadError::ReachedEndOfFile) => {
                debug!("Scheduler reached end of file");
                self.scheduling_complete = true;
                false
            }
            // queued buffers still play; only an empty sink is starving
            Err(ReadError::NotEnoughData) if self.outstanding > 0 => {
                trace!(outstanding = self.outstanding, "Scheduler caught up with parsed data");
                false
            }
            Err(ReadError::NotEnoughData) => {
                trace!("Scheduler reached end of parsed data");
                self.set_buffering(true);
                if self.progressive {
                    self.set_waiting(true);
                }
                false
            }
            Err(e) => {
                debug!(error = %e, "Cannot read buffer");
                false
            }
        }
    }

    fn set_buffering(&mut self, buffering: bool) {
        if self.buffering != buffering {
            self.buffering = buffering;
            self.emit(StreamerEvent::Buffering(buffering));
        }
    }

    fn set_waiting(&mut self, waiting: bool) {
        // the flag stays up while a pending seek waits
        if !waiting && self.pending_seek.is_some() {
            return;
        }
        if self.waiting_for_downloader != waiting {
            self.waiting_for_downloader = waiting;
            self.emit(StreamerEvent::WaitingForDownloader(waiting));
        }
    }

    fn handle_time_update(&mut self) {
        let Some(duration) = self.duration else {
            return;
        };
        let reached = self.current_time() + self.total_time_offset >= duration.max(self.total_duration);
        if !reached {
            self.end_reported = false;
            return;
        }
        if self.end_reported {
            return;
        }
        info!(duration, "Playback reached the end");
        if let Err(e) = self.seek(0.0, true) {
            warn!(error = %e, "Failed to rewind after end of stream");
        }
        self.end_reported = true;
        self.pause();
        self.emit(StreamerEvent::FileFinished);
    }

    fn notify_time_updated(&mut self) {
        if !self.sink.is_running() || !self.sink.is_playing() {
            return;
        }
        let time = self.current_time();
        self.emit(StreamerEvent::CurrentTime(time));
    }

    fn handle_duration_update(&mut self) {
        let Some(duration) = self.demuxer.as_ref().and_then(|demuxer| demuxer.duration()) else {
            return;
        };
        if self.duration.is_none_or(|old| old < duration) {
            self.duration = Some(duration);
            self.emit(StreamerEvent::Duration(duration));
        }
    }

    /// Apply a transfer delivery. Deliveries of superseded transfers do nothing.
    pub fn handle_transfer(&mut self, message: TransferMessage) {
        for notification in self.downloader.apply(message) {
            match notification {
                DownloadNotification::RangeSupport {
                    supports_range,
                    total_size,
                } => self.emit(StreamerEvent::RangeSupport {
                    supports_range,
                    total_size,
                }),
                DownloadNotification::Data { chunk, progress } => self.ingest(&chunk, progress),
                DownloadNotification::Completed => self.emit(StreamerEvent::DownloadCompleted),
                DownloadNotification::Failed {
                    error,
                    bytes_staged,
                    response,
                } => self.emit(StreamerEvent::DownloadFailed {
                    error,
                    bytes_staged,
                    response,
                }),
            }
        }
    }

    /// Apply a local read delivery tagged with `generation`.
    pub fn handle_local(&mut self, generation: u64, event: LocalEvent) {
        if generation != self.source_generation {
            trace!(generation, "Discarding delivery from superseded local read");
            return;
        }
        let Source::Local { size, read, .. } = &mut self.source else {
            return;
        };
        match event {
            LocalEvent::Opened { size: file_size } => *size = Some(file_size),
            LocalEvent::Chunk(chunk) => {
                *read += chunk.len() as u64;
                let progress = match *size {
                    Some(total) if total > 0 => (*read as f64 / total as f64) as f32,
                    _ => crate::downloader::UNKNOWN_PROGRESS,
                };
                self.ingest(&chunk, progress);
            }
            LocalEvent::Finished(Ok(())) => self.emit(StreamerEvent::DownloadCompleted),
            LocalEvent::Finished(Err(error)) => {
                let bytes_staged = *read as i64;
                self.emit(StreamerEvent::DownloadFailed {
                    error,
                    bytes_staged,
                    response: None,
                });
            }
        }
    }

    fn ingest(&mut self, chunk: &Bytes, progress: f32) {
        let ready_seek = match self.pending_seek {
            Some(pending) if self.progressive && f64::from(progress) >= pending.wait_for_progress => {
                Some(pending)
            }
            _ => None,
        };

        let Some(demuxer) = self.demuxer.as_mut() else {
            return;
        };
        if let Err(e) = demuxer.parse(chunk) {
            debug!(error = %e, "Failed to parse chunk");
        }

        if self.reader.is_none()
            && let Some(format) = demuxer.data_format()
        {
            match demuxer.make_reader(self.config.sample_rate) {
                Ok(reader) => {
                    debug!(sample_rate = format.sample_rate, channels = format.channels, "Reader created");
                    self.reader = Some(reader);
                }
                Err(e) => warn!(error = %e, "Failed to create reader"),
            }
            if self.format.is_none() {
                self.format = Some(format);
                self.emit(StreamerEvent::FormatAvailable(format));
            }
        }

        self.emit(StreamerEvent::DownloadProgress {
            progress,
            bytes: chunk.len() as i64,
        });
        self.handle_duration_update();

        if let Some(pending) = ready_seek {
            self.clear_pending_seek();
            if let Err(e) = self.seek(pending.time, false) {
                warn!(error = %e, "Pending seek failed");
            }
        }
    }
}
