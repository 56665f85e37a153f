//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::downloader::{FetchRequest, TransferSender, Transport};
use crate::media::{
    AudioSink, Completion, Demuxer, DemuxerFactory, PacketReader, PcmBuffer, StreamFormat, Tap,
};
use crate::metadata::{MetadataProbe, ProbeResult, ProbeSource};
use crate::{DownloadError, MediaError, ReadError, SinkError};

/// Transport whose transfers never produce anything. Tests inject deliveries
/// by hand with the downloader's current transfer id.
pub struct PendingTransport;

#[async_trait]
impl Transport for PendingTransport {
    async fn fetch(
        &self,
        _request: FetchRequest,
        _sender: &mut TransferSender,
    ) -> Result<(), DownloadError> {
        futures::future::pending::<()>().await;
        Ok(())
    }
}

/// Probe answering with a fixed result.
pub struct StaticProbe(pub ProbeResult);

#[async_trait]
impl MetadataProbe for StaticProbe {
    async fn probe(&self, _source: &ProbeSource, _needs_asset: bool) -> ProbeResult {
        self.0.clone()
    }
}

/// Shape of the fake bitstream.
#[derive(Debug, Clone, Copy)]
pub struct MediaSpec {
    pub sample_rate: f64,
    pub frames_per_packet: u32,
    pub bytes_per_packet: usize,
    /// Bytes needed before the format is known
    pub format_after_bytes: usize,
    /// Stream length; reads past it report end of file
    pub total_bytes: Option<usize>,
    /// Sample value written to channel 0
    pub amplitude: f32,
}

impl Default for MediaSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            frames_per_packet: 1024,
            bytes_per_packet: 400,
            format_after_bytes: 400,
            total_bytes: None,
            amplitude: 0.5,
        }
    }
}

#[derive(Debug, Default)]
pub struct DemuxState {
    pub parsed_bytes: usize,
    pub reader_position: u64,
    pub seeks: Vec<u64>,
    pub readers_made: usize,
}

/// Demuxer factory that remembers every demuxer it made.
#[derive(Default)]
pub struct MockMedia {
    pub spec: MediaSpec,
    pub fail_create: Mutex<bool>,
    pub created: Mutex<Vec<Arc<Mutex<DemuxState>>>>,
}

impl MockMedia {
    pub fn new(spec: MediaSpec) -> Arc<Self> {
        Arc::new(Self {
            spec,
            ..Default::default()
        })
    }

    pub fn latest(&self) -> Arc<Mutex<DemuxState>> {
        Arc::clone(self.created.lock().last().expect("no demuxer created"))
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl DemuxerFactory for MockMedia {
    fn create(&self) -> Result<Box<dyn Demuxer>, MediaError> {
        if *self.fail_create.lock() {
            return Err(MediaError::CreateDemuxer("scripted failure".into()));
        }
        let state = Arc::new(Mutex::new(DemuxState::default()));
        self.created.lock().push(Arc::clone(&state));
        Ok(Box::new(MockDemuxer {
            spec: self.spec,
            state,
        }))
    }
}

struct MockDemuxer {
    spec: MediaSpec,
    state: Arc<Mutex<DemuxState>>,
}

fn packets(spec: &MediaSpec, state: &DemuxState) -> u64 {
    (state.parsed_bytes / spec.bytes_per_packet) as u64
}

impl Demuxer for MockDemuxer {
    fn parse(&mut self, data: &[u8]) -> Result<(), MediaError> {
        self.state.lock().parsed_bytes += data.len();
        Ok(())
    }

    fn data_format(&self) -> Option<StreamFormat> {
        (self.state.lock().parsed_bytes >= self.spec.format_after_bytes).then_some(StreamFormat {
            sample_rate: self.spec.sample_rate,
            channels: 2,
        })
    }

    fn duration(&self) -> Option<f64> {
        let packets = packets(&self.spec, &self.state.lock());
        (packets > 0)
            .then(|| (packets * u64::from(self.spec.frames_per_packet)) as f64 / self.spec.sample_rate)
    }

    fn frame_offset(&self, time: f64) -> Option<u64> {
        (time >= 0.0).then(|| (time * self.spec.sample_rate) as u64)
    }

    fn packet_offset(&self, frame: u64) -> Option<u64> {
        let packet = frame / u64::from(self.spec.frames_per_packet);
        (packet <= packets(&self.spec, &self.state.lock())).then_some(packet)
    }

    fn make_reader(&mut self, _sample_rate: f64) -> Result<Box<dyn PacketReader>, MediaError> {
        self.state.lock().readers_made += 1;
        Ok(Box::new(MockReader {
            spec: self.spec,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockReader {
    spec: MediaSpec,
    state: Arc<Mutex<DemuxState>>,
}

impl PacketReader for MockReader {
    fn seek(&mut self, packet: u64) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        state.reader_position = packet;
        state.seeks.push(packet);
        Ok(())
    }

    fn read(&mut self, frames: u32) -> Result<PcmBuffer, ReadError> {
        let mut state = self.state.lock();
        let available = packets(&self.spec, &state).saturating_sub(state.reader_position);
        if available == 0 {
            let complete = self
                .spec
                .total_bytes
                .is_some_and(|total| state.parsed_bytes >= total);
            return Err(if complete {
                ReadError::ReachedEndOfFile
            } else {
                ReadError::NotEnoughData
            });
        }
        let needed = u64::from(frames.div_ceil(self.spec.frames_per_packet).max(1));
        let take = needed.min(available);
        state.reader_position += take;
        let len = (take * u64::from(self.spec.frames_per_packet)) as usize;
        Ok(PcmBuffer::new(
            self.spec.sample_rate,
            vec![vec![self.spec.amplitude; len], vec![0.0; len]],
        ))
    }
}

pub struct SinkState {
    pub running: bool,
    pub playing: bool,
    pub fail_start: bool,
    pub fail_schedule: bool,
    pub queue: VecDeque<(PcmBuffer, Completion)>,
    pub scheduled_total: usize,
    pub position: Option<f64>,
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
    pub global_gain: f32,
    pub tap: Option<Tap>,
    pub stops: usize,
}

impl Default for SinkState {
    fn default() -> Self {
        Self {
            running: false,
            playing: false,
            fail_start: false,
            fail_schedule: false,
            queue: VecDeque::new(),
            scheduled_total: 0,
            position: None,
            volume: 1.0,
            rate: 1.0,
            pitch: 0.0,
            global_gain: 0.0,
            tap: None,
            stops: 0,
        }
    }
}

/// Sink that only queues. Tests render buffers with [`MockSink::consume`].
#[derive(Clone, Default)]
pub struct MockSink(pub Arc<Mutex<SinkState>>);

impl MockSink {
    pub fn state(&self) -> parking_lot::MutexGuard<'_, SinkState> {
        self.0.lock()
    }

    pub fn set_position(&self, seconds: f64) {
        self.0.lock().position = Some(seconds);
    }

    pub fn queued(&self) -> usize {
        self.0.lock().queue.len()
    }

    /// Render up to `n` queued buffers, running the tap and completions.
    pub fn consume(&self, n: usize) -> usize {
        let mut rendered = 0;
        for _ in 0..n {
            let (buffer, done, tap) = {
                let mut state = self.0.lock();
                let Some((buffer, done)) = state.queue.pop_front() else {
                    break;
                };
                (buffer, done, state.tap.take())
            };
            let tap = tap.map(|mut tap| {
                tap(&buffer);
                tap
            });
            if let Some(tap) = tap {
                let mut state = self.0.lock();
                if state.tap.is_none() {
                    state.tap = Some(tap);
                }
            }
            done();
            rendered += 1;
        }
        rendered
    }
}

impl AudioSink for MockSink {
    fn start(&mut self) -> Result<(), SinkError> {
        let mut state = self.0.lock();
        if state.fail_start {
            return Err(SinkError::Start("scripted failure".into()));
        }
        state.running = true;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.0.lock().running
    }

    fn shutdown(&mut self) {
        self.0.lock().running = false;
    }

    fn play(&mut self) {
        self.0.lock().playing = true;
    }

    fn pause(&mut self) {
        self.0.lock().playing = false;
    }

    fn stop(&mut self) {
        let mut state = self.0.lock();
        state.playing = false;
        state.queue.clear();
        state.position = None;
        state.stops += 1;
    }

    fn is_playing(&self) -> bool {
        self.0.lock().playing
    }

    fn schedule(&mut self, buffer: PcmBuffer, on_consumed: Completion) -> Result<(), SinkError> {
        let mut state = self.0.lock();
        if state.fail_schedule {
            return Err(SinkError::Schedule("scripted failure".into()));
        }
        state.queue.push_back((buffer, on_consumed));
        state.scheduled_total += 1;
        Ok(())
    }

    fn render_position(&self) -> Option<f64> {
        self.0.lock().position
    }

    fn volume(&self) -> f32 {
        self.0.lock().volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.0.lock().volume = volume;
    }

    fn set_rate(&mut self, rate: f32) {
        self.0.lock().rate = rate;
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.0.lock().pitch = pitch;
    }

    fn set_global_gain(&mut self, gain: f32) {
        self.0.lock().global_gain = gain;
    }

    fn install_tap(&mut self, tap: Tap) {
        self.0.lock().tap = Some(tap);
    }

    fn remove_tap(&mut self) {
        self.0.lock().tap = None;
    }
}
