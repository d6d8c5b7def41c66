//! Sample playback.
//!
//! Plays a decoded buffer with pitch shifting by playback-rate scaling and
//! linear interpolation: `rate = 2^((note - root) / 12)`, further scaled by
//! the buffer-to-engine sample-rate ratio.

use std::sync::Arc;

use crate::decode::DecodedAudio;

/// A decoded sample held in memory, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    /// Native sample rate of the audio.
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        SampleBuffer {
            channels,
            sample_rate,
        }
    }

    pub fn mono(data: Vec<f32>, sample_rate: u32) -> Self {
        SampleBuffer::new(vec![data], sample_rate)
    }

    /// Create from 16-bit signed PCM data.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        SampleBuffer::mono(pcm.iter().map(|&s| s as f32 / 32768.0).collect(), sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a channel with linear interpolation at a fractional position.
    pub fn read_interpolated(&self, channel: usize, position: f64) -> f64 {
        let Some(data) = self.channels.get(channel) else {
            return 0.0;
        };
        if data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= data.len() - 1 {
            return data.get(idx).map_or(0.0, |&s| s as f64);
        }

        let frac = position - idx as f64;
        data[idx] as f64 * (1.0 - frac) + data[idx + 1] as f64 * frac
    }
}

impl From<DecodedAudio> for SampleBuffer {
    fn from(audio: DecodedAudio) -> Self {
        SampleBuffer::new(audio.frames, audio.sample_rate)
    }
}

/// Playback rate for `note` on a sample recorded at `root_note`.
pub fn playback_rate(note: u8, root_note: u8) -> f64 {
    (2.0_f64).powf((note as f64 - root_note as f64) / 12.0)
}

/// Reads one buffer from start to end at a fixed rate.
#[derive(Debug, Clone)]
pub struct SamplePlayer {
    buffer: Arc<SampleBuffer>,
    position: f64,
    step: f64,
    finished: bool,
}

impl SamplePlayer {
    pub fn new(buffer: Arc<SampleBuffer>, note: u8, root_note: u8, engine_sample_rate: f64) -> Self {
        let sr_ratio = buffer.sample_rate as f64 / engine_sample_rate;
        let finished = buffer.is_empty();
        SamplePlayer {
            step: playback_rate(note, root_note) * sr_ratio,
            buffer,
            position: 0.0,
            finished,
        }
    }

    /// Next stereo frame. Mono buffers feed both sides.
    pub fn next_frame(&mut self) -> (f64, f64) {
        self.next_frame_modulated(1.0)
    }

    /// Next stereo frame, advancing `ratio` times the base rate.
    pub fn next_frame_modulated(&mut self, ratio: f64) -> (f64, f64) {
        if self.finished {
            return (0.0, 0.0);
        }

        let last = self.buffer.channel_count().saturating_sub(1);
        let left = self.buffer.read_interpolated(0, self.position);
        let right = self.buffer.read_interpolated(last.min(1), self.position);

        self.position += self.step * ratio;
        if self.position >= self.buffer.len() as f64 {
            self.finished = true;
        }

        (left, right)
    }

    /// True once playback has run off the end of the buffer.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn position(&self) -> f64 {
        self.position
    }
}
