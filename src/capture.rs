//! Live capture of the master output.
//!
//! The audio callback pushes mono samples into an `rtrb` ring. A named
//! worker thread drains the ring into blocks while recording runs; on stop
//! the blocks are concatenated and encoded. The callback never blocks on
//! the recorder: when the ring is full the overflow is dropped.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavSpec, WavWriter};
use rtrb::Consumer;
use tracing::{info, warn};

use crate::dsp::renderer::encode_wav;
use crate::error::CaptureError;

/// How long the worker sleeps when the ring is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the worker keeps draining after a stop request while the
/// audio side still holds the ring open.
const STOP_GRACE: Duration = Duration::from_millis(250);

/// Seconds of audio the capture ring can hold between worker polls.
pub const RING_SECONDS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    /// Canonical 44-byte-header mono 16-bit PCM WAV.
    Pcm16Wav,
    /// Mono 32-bit IEEE-float WAV. Falls back to [`CaptureFormat::Pcm16Wav`]
    /// if it cannot be written.
    Float32Wav,
}

/// A finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    /// Format actually written, after any fallback.
    pub format: CaptureFormat,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
    pub bytes: Vec<u8>,
}

/// The worker side of a running capture.
#[derive(Debug)]
pub struct Recorder {
    stop: Arc<AtomicBool>,
    worker: JoinHandle<Vec<Vec<f32>>>,
    sample_rate: u32,
    format: CaptureFormat,
}

impl Recorder {
    /// Start draining `consumer` on a worker thread.
    pub fn spawn(
        consumer: Consumer<f32>,
        sample_rate: u32,
        format: CaptureFormat,
    ) -> Result<Self, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("capture".into())
            .spawn(move || accumulate(consumer, &worker_stop))
            .map_err(|e| CaptureError::Spawn(e.to_string()))?;

        info!(sample_rate, ?format, "capture started");
        Ok(Recorder {
            stop,
            worker,
            sample_rate,
            format,
        })
    }

    /// Stop the worker, concatenate what it gathered and encode it.
    pub fn finish(self) -> Result<CapturedAudio, CaptureError> {
        self.stop.store(true, Ordering::Release);
        let blocks = self
            .worker
            .join()
            .map_err(|_| CaptureError::WorkerPanicked)?;

        let samples: Vec<f32> = blocks.concat();
        let (format, bytes) = encode(&samples, self.sample_rate, self.format);
        info!(
            samples = samples.len(),
            blocks = blocks.len(),
            ?format,
            "capture stopped"
        );
        Ok(CapturedAudio {
            format,
            sample_rate: self.sample_rate,
            samples,
            bytes,
        })
    }
}

/// Drain the ring until the producer is gone, or until the stop grace
/// period runs out.
fn accumulate(mut consumer: Consumer<f32>, stop: &AtomicBool) -> Vec<Vec<f32>> {
    let mut blocks = Vec::new();
    let mut stop_seen: Option<Instant> = None;

    loop {
        let available = consumer.slots();
        if available > 0 {
            if let Ok(chunk) = consumer.read_chunk(available) {
                let (first, second) = chunk.as_slices();
                let mut block = Vec::with_capacity(available);
                block.extend_from_slice(first);
                block.extend_from_slice(second);
                chunk.commit_all();
                blocks.push(block);
            }
            continue;
        }

        if consumer.is_abandoned() {
            break;
        }
        if stop.load(Ordering::Acquire) {
            let since = *stop_seen.get_or_insert_with(Instant::now);
            if since.elapsed() >= STOP_GRACE {
                break;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    blocks
}

/// Encode `samples` in `format`, falling back to 16-bit PCM when the float
/// writer fails. Returns the format actually used.
pub fn encode(samples: &[f32], sample_rate: u32, format: CaptureFormat) -> (CaptureFormat, Vec<u8>) {
    match format {
        CaptureFormat::Pcm16Wav => (CaptureFormat::Pcm16Wav, encode_wav(samples, sample_rate)),
        CaptureFormat::Float32Wav => match encode_float_wav(samples, sample_rate) {
            Ok(bytes) => (CaptureFormat::Float32Wav, bytes),
            Err(e) => {
                warn!(error = %e, "float capture unavailable, falling back to 16-bit PCM");
                (CaptureFormat::Pcm16Wav, encode_wav(samples, sample_rate))
            }
        },
    }
}

/// Mono IEEE-float WAV via `hound`.
pub fn encode_float_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DefaultDecoder, SampleDecoder};
    use rtrb::RingBuffer;

    #[test]
    fn recorder_collects_until_producer_drops() {
        let (mut tx, rx) = RingBuffer::<f32>::new(64);
        let recorder = Recorder::spawn(rx, 8000, CaptureFormat::Pcm16Wav).unwrap();

        let mut sent = Vec::new();
        for i in 0..300 {
            let s = (i as f32 * 0.01).sin() * 0.5;
            while tx.push(s).is_err() {
                thread::sleep(Duration::from_millis(1));
            }
            sent.push(s);
        }
        drop(tx);

        let captured = recorder.finish().unwrap();
        assert_eq!(captured.samples, sent);
        assert_eq!(captured.format, CaptureFormat::Pcm16Wav);
        assert_eq!(captured.bytes.len(), 44 + 600);
    }

    #[test]
    fn finish_returns_after_grace_when_producer_is_still_alive() {
        let (mut tx, rx) = RingBuffer::<f32>::new(16);
        let recorder = Recorder::spawn(rx, 8000, CaptureFormat::Pcm16Wav).unwrap();
        for _ in 0..8 {
            tx.push(0.25).unwrap();
        }
        let captured = recorder.finish().unwrap();
        assert_eq!(captured.samples, vec![0.25; 8]);
        drop(tx);
    }

    #[test]
    fn float_capture_decodes_back() {
        let samples = [0.0f32, 0.5, -0.25, 1.0];
        let (format, bytes) = encode(&samples, 48000, CaptureFormat::Float32Wav);
        assert_eq!(format, CaptureFormat::Float32Wav);

        let audio = DefaultDecoder.decode(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.frames[0], samples.to_vec());
    }

    #[test]
    fn pcm_capture_uses_canonical_header() {
        let (format, bytes) = encode(&[0.1; 10], 44100, CaptureFormat::Pcm16Wav);
        assert_eq!(format, CaptureFormat::Pcm16Wav);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 20);
    }
}
