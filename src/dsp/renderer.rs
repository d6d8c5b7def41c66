//! Offline renderer: isolated notes to mono 16-bit WAV.
//!
//! Each render runs on its own [`Synth`] with the sends switched off, so the
//! result depends only on the parameters, the note and the duration. The
//! note is released early enough for its release tail to end inside the
//! requested duration.

use super::engine::Synth;
use super::envelope::Envelope;
use super::voice::VoiceId;
use crate::params::SynthParams;

/// Size of the canonical RIFF/WAVE header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// One rendered note.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNote {
    pub note: u8,
    pub sample_rate: u32,
    /// Mono samples, `round(duration * sample_rate)` of them.
    pub samples: Vec<f32>,
    /// `samples` encoded with [`encode_wav`].
    pub wav: Vec<u8>,
}

/// Render `note` at full velocity for `duration` seconds.
pub fn render_note(params: &SynthParams, note: u8, duration: f64, sample_rate: u32) -> RenderedNote {
    let synth = Synth::offline(params.clone(), sample_rate as f64);
    render_note_on(synth, note, duration)
}

/// Render `note` on a caller-configured engine, e.g. one carrying a custom
/// waveform or a sampled instrument.
pub fn render_note_on(mut synth: Synth, note: u8, duration: f64) -> RenderedNote {
    let sample_rate = synth.sample_rate();
    let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
    let total = (duration * sample_rate).round() as usize;
    let release = Envelope::with_adsr(sample_rate, synth.params().amp_envelope).release_samples();
    let note_off_at = total.saturating_sub(release);

    let mut left = vec![0.0f32; total];
    let mut right = vec![0.0f32; total];

    synth.note_on(note, 1.0, None);
    let (held_l, tail_l) = left.split_at_mut(note_off_at);
    let (held_r, tail_r) = right.split_at_mut(note_off_at);
    synth.render(held_l, held_r);
    synth.note_off(note as VoiceId);
    synth.render(tail_l, tail_r);

    let samples: Vec<f32> = left
        .iter()
        .zip(&right)
        .map(|(l, r)| 0.5 * (l + r))
        .collect();
    let sample_rate = sample_rate as u32;

    RenderedNote {
        note,
        sample_rate,
        wav: encode_wav(&samples, sample_rate),
        samples,
    }
}

/// Render a batch of isolated notes for sample-pack export.
pub fn render_sample_pack(
    params: &SynthParams,
    notes: &[u8],
    duration: f64,
    sample_rate: u32,
) -> Vec<RenderedNote> {
    notes
        .iter()
        .map(|&note| render_note(params, note, duration, sample_rate))
        .collect()
}

/// Convert a float sample to 16-bit PCM: clamp to [-1, 1], then scale
/// negatives by 32768 and positives by 32767.
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode mono float samples as a 16-bit PCM WAV byte buffer.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(WAV_HEADER_LEN + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&to_pcm16(sample).to_le_bytes());
    }

    buf
}
