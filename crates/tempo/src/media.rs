//! Boundaries to the bitstream parser and the audio output.
//!
//! The engine never decodes or renders anything itself. A [`Demuxer`] turns
//! raw bytes into packets, a [`PacketReader`] turns packets into fixed-size
//! [`PcmBuffer`]s, and an [`AudioSink`] plays them.

use crate::{MediaError, ReadError, SinkError};

/// Format of the decoded stream, known once the demuxer has seen enough bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub sample_rate: f64,
    pub channels: u16,
}

/// Decoded, non-interleaved audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: f64,
    /// One vector of samples per channel, all of equal length
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn new(sample_rate: f64, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Silent buffer of `frames` frames.
    pub fn silence(sample_rate: f64, channel_count: usize, frames: usize) -> Self {
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.frames() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// Incremental container parser.
pub trait Demuxer: Send {
    /// Feed the next bytes of the stream, in order.
    fn parse(&mut self, data: &[u8]) -> Result<(), MediaError>;

    fn data_format(&self) -> Option<StreamFormat>;

    /// Duration of what was parsed so far, or the container's estimate.
    fn duration(&self) -> Option<f64>;

    fn frame_offset(&self, time: f64) -> Option<u64>;

    fn packet_offset(&self, frame: u64) -> Option<u64>;

    /// Reader decoding to `sample_rate`. Only valid once a format is known.
    fn make_reader(&mut self, sample_rate: f64) -> Result<Box<dyn PacketReader>, MediaError>;
}

/// Decodes packets of its demuxer into buffers on demand.
pub trait PacketReader: Send {
    fn seek(&mut self, packet: u64) -> Result<(), MediaError>;

    /// Next buffer of at most `frames` frames.
    fn read(&mut self, frames: u32) -> Result<PcmBuffer, ReadError>;
}

/// Creates a fresh demuxer for every opened stream.
pub trait DemuxerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Demuxer>, MediaError>;
}

impl<F> DemuxerFactory for F
where
    F: Fn() -> Result<Box<dyn Demuxer>, MediaError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Demuxer>, MediaError> {
        self()
    }
}

/// Invoked once the sink has rendered a scheduled buffer.
pub type Completion = Box<dyn FnOnce() + Send>;

/// Observes every buffer leaving the output mix.
pub type Tap = Box<dyn FnMut(&PcmBuffer) + Send>;

/// Push-model audio output with a rate/pitch/gain chain.
///
/// `stop` drops every queued buffer and rewinds the render position to zero;
/// completions of dropped buffers may or may not run.
pub trait AudioSink: Send {
    fn start(&mut self) -> Result<(), SinkError>;
    fn is_running(&self) -> bool;
    /// Stop the whole output, not just the player.
    fn shutdown(&mut self);

    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;

    fn schedule(&mut self, buffer: PcmBuffer, on_consumed: Completion) -> Result<(), SinkError>;

    /// Seconds rendered since the last `stop`, if the sink is rendering.
    fn render_position(&self) -> Option<f64>;

    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn set_rate(&mut self, rate: f32);
    fn set_pitch(&mut self, pitch: f32);
    fn set_global_gain(&mut self, gain: f32);

    fn install_tap(&mut self, tap: Tap);
    fn remove_tap(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_duration() {
        let buffer = PcmBuffer::silence(44_100.0, 2, 8192);
        assert_eq!(buffer.frames(), 8192);
        assert!((buffer.duration() - 8192.0 / 44_100.0).abs() < 1e-12);
        assert_eq!(buffer.channel(1).map(<[f32]>::len), Some(8192));
        assert!(buffer.channel(2).is_none());
        assert_eq!(PcmBuffer::default().duration(), 0.0);
    }

    #[test]
    fn test_closure_factory() {
        let factory = || -> Result<Box<dyn Demuxer>, MediaError> {
            Err(MediaError::CreateDemuxer("no codec".into()))
        };
        assert!(matches!(factory.create(), Err(MediaError::CreateDemuxer(_))));
    }
}
