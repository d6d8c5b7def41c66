//! Sample decoding: raw bytes to de-interleaved float frames.
//!
//! RIFF/WAVE is always available through `hound`. MPEG audio needs the
//! `mp3` feature. Anything else is reported as an unsupported format.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use crate::error::LoadError;

/// Decoded audio, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.frames.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> Self {
        let count = channels.max(1) as usize;
        let mut frames = vec![Vec::with_capacity(samples.len() / count); count];
        for chunk in samples.chunks_exact(count) {
            for (channel, &s) in frames.iter_mut().zip(chunk) {
                channel.push(s);
            }
        }
        DecodedAudio {
            channels: count as u16,
            sample_rate,
            frames,
        }
    }
}

/// Turns encoded sample bytes into audio.
pub trait SampleDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, LoadError>;
}

/// Container-sniffing decoder used unless the host supplies its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl SampleDecoder for DefaultDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, LoadError> {
        let audio = if is_wav(bytes) {
            decode_wav(bytes)?
        } else if is_mpeg(bytes) {
            decode_mp3(bytes)?
        } else {
            return Err(LoadError::UnsupportedFormat);
        };

        if audio.is_empty() || audio.sample_rate == 0 {
            return Err(LoadError::Empty);
        }
        Ok(audio)
    }
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// ID3 tag or an MPEG frame sync.
fn is_mpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
}

/// Decode a RIFF/WAVE file, integer or float.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, LoadError> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample.clamp(1, 32);
            let max_val = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(DecodedAudio::from_interleaved(
        &samples,
        spec.channels,
        spec.sample_rate,
    ))
}

#[cfg(feature = "mp3")]
fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, LoadError> {
    use minimp3::{Decoder, Error, Frame};

    let mut decoder = Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut format: Option<(u16, u32)> = None;

    loop {
        match decoder.next_frame() {
            Ok(Frame {
                data,
                sample_rate,
                channels,
                ..
            }) => {
                format.get_or_insert((channels as u16, sample_rate.max(0) as u32));
                samples.extend(data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(Error::Eof) => break,
            Err(e) => {
                return Err(LoadError::Decode {
                    reason: e.to_string(),
                });
            }
        }
    }

    let (channels, sample_rate) = format.ok_or(LoadError::Empty)?;
    Ok(DecodedAudio::from_interleaved(&samples, channels, sample_rate))
}

#[cfg(not(feature = "mp3"))]
fn decode_mp3(_bytes: &[u8]) -> Result<DecodedAudio, LoadError> {
    Err(LoadError::UnsupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn wav_bytes(spec: WavSpec, write: impl FnOnce(&mut WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_stereo_pcm16() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            for _ in 0..10 {
                w.write_sample(16384i16).unwrap();
                w.write_sample(-16384i16).unwrap();
            }
        });

        let audio = DefaultDecoder.decode(&bytes).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.len(), 10);
        assert!((audio.frames[0][3] - 0.5).abs() < 1e-4);
        assert!((audio.frames[1][3] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn decodes_float_wav() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for s in [0.0f32, 0.25, -0.75] {
                w.write_sample(s).unwrap();
            }
        });

        let audio = DefaultDecoder.decode(&bytes).unwrap();
        assert_eq!(audio.frames, vec![vec![0.0, 0.25, -0.75]]);
    }

    #[test]
    fn empty_wav_is_an_error() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |_| {});
        assert_eq!(DefaultDecoder.decode(&bytes), Err(LoadError::Empty));
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        assert_eq!(
            DefaultDecoder.decode(b"OggS\0\0\0\0"),
            Err(LoadError::UnsupportedFormat)
        );
        assert_eq!(DefaultDecoder.decode(&[]), Err(LoadError::UnsupportedFormat));
    }

    #[test]
    fn truncated_wav_reports_decode_failure() {
        let mut bytes = b"RIFF\x24\0\0\0WAVE".to_vec();
        bytes.extend_from_slice(b"junk");
        assert!(matches!(
            DefaultDecoder.decode(&bytes),
            Err(LoadError::Decode { .. })
        ));
    }
}
