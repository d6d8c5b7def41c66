//! Real-time control surface.
//!
//! [`channel`] splits a [`Synth`] into a [`SynthController`] for the
//! control/UI thread and a [`SynthProcessor`] for the audio callback. They
//! talk over a single-producer/single-consumer `rtrb` ring: the controller
//! pushes [`ControlMessage`]s and never blocks, the processor drains the ring
//! at the top of each block and then renders. Work that allocates heavily
//! (sample decoding, reverb impulses, custom wavetables) happens on the
//! controller side and crosses the ring as finished data.

use std::collections::BTreeMap;
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::warn;

use crate::capture::{CaptureFormat, CapturedAudio, RING_SECONDS, Recorder};
use crate::decode::{DefaultDecoder, SampleDecoder};
use crate::dsp::engine::Synth;
use crate::dsp::reverb::ConvolutionReverb;
use crate::dsp::sampler::SampleBuffer;
use crate::dsp::spectrum::WavetableSet;
use crate::dsp::voice::VoiceId;
use crate::error::{CaptureError, EngineError, LoadError};
use crate::instrument::{InstrumentDefinition, InstrumentId, user_sample_id};
use crate::params::Param;

/// Messages from the controller to the audio callback.
pub enum ControlMessage {
    NoteOn {
        note: u8,
        velocity: f64,
        id: Option<VoiceId>,
    },
    NoteOff(VoiceId),
    AllNotesOff,
    StartDrone,
    StopDrone,
    Set(Param),
    SetReverb(Box<ConvolutionReverb>),
    SetCustomWavetables(Arc<WavetableSet>),
    SelectInstrument(InstrumentId),
    AddInstrument {
        id: InstrumentId,
        definition: InstrumentDefinition,
    },
    AddSampledInstrument {
        id: InstrumentId,
        buffer: Arc<SampleBuffer>,
        root_note: u8,
    },
    BeginSampleLoad(String),
    SampleLoaded {
        key: String,
        result: Result<Arc<SampleBuffer>, LoadError>,
    },
    AttachCapture(Producer<f32>),
    DetachCapture,
}

impl ControlMessage {
    fn name(&self) -> &'static str {
        match self {
            ControlMessage::NoteOn { .. } => "note-on",
            ControlMessage::NoteOff(_) => "note-off",
            ControlMessage::AllNotesOff => "all-notes-off",
            ControlMessage::StartDrone => "start-drone",
            ControlMessage::StopDrone => "stop-drone",
            ControlMessage::Set(_) => "parameter change",
            ControlMessage::SetReverb(_) => "reverb impulse",
            ControlMessage::SetCustomWavetables(_) => "custom waveform",
            ControlMessage::SelectInstrument(_) => "instrument selection",
            ControlMessage::AddInstrument { .. } => "instrument definition",
            ControlMessage::AddSampledInstrument { .. } => "sampled instrument",
            ControlMessage::BeginSampleLoad(_) => "sample load start",
            ControlMessage::SampleLoaded { .. } => "sample load result",
            ControlMessage::AttachCapture(_) => "capture attach",
            ControlMessage::DetachCapture => "capture detach",
        }
    }
}

impl std::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Split `synth` into its control and audio halves. `capacity` bounds the
/// number of messages in flight.
pub fn channel(synth: Synth, capacity: usize) -> (SynthController, SynthProcessor) {
    let (tx, rx) = RingBuffer::new(capacity.max(1));
    let controller = SynthController {
        tx,
        sample_rate: synth.sample_rate(),
        next_user_index: synth.instruments().peek_user_index(),
        recorder: None,
    };
    let processor = SynthProcessor {
        synth,
        rx,
        capture: None,
    };
    (controller, processor)
}

/// Control-thread handle. Every method returns immediately.
#[derive(Debug)]
pub struct SynthController {
    tx: Producer<ControlMessage>,
    sample_rate: f64,
    next_user_index: u32,
    recorder: Option<Recorder>,
}

impl SynthController {
    fn send(&mut self, message: ControlMessage) -> Result<(), EngineError> {
        let name = message.name();
        self.tx.push(message).map_err(|_| {
            warn!(message = name, "control queue full");
            EngineError::QueueFull { message: name }
        })
    }

    pub fn note_on(&mut self, note: u8, velocity: f64, id: Option<VoiceId>) -> Result<(), EngineError> {
        self.send(ControlMessage::NoteOn { note, velocity, id })
    }

    pub fn note_off(&mut self, id: VoiceId) -> Result<(), EngineError> {
        self.send(ControlMessage::NoteOff(id))
    }

    pub fn all_notes_off(&mut self) -> Result<(), EngineError> {
        self.send(ControlMessage::AllNotesOff)
    }

    pub fn start_drone(&mut self) -> Result<(), EngineError> {
        self.send(ControlMessage::StartDrone)
    }

    pub fn stop_drone(&mut self) -> Result<(), EngineError> {
        self.send(ControlMessage::StopDrone)
    }

    /// Change one parameter. A reverb size change builds the new impulse
    /// here rather than on the audio thread.
    pub fn set(&mut self, param: Param) -> Result<(), EngineError> {
        match param {
            Param::ReverbSize(seconds) => {
                let reverb = ConvolutionReverb::new(seconds, self.sample_rate);
                self.send(ControlMessage::SetReverb(Box::new(reverb)))
            }
            _ => self.send(ControlMessage::Set(param)),
        }
    }

    /// Replace the custom single cycle. Every band-limited table it needs
    /// is built here, so note-ons on the audio thread only look one up.
    pub fn set_custom_waveform(&mut self, cycle: &[f32]) -> Result<(), EngineError> {
        let tables = WavetableSet::new(cycle, self.sample_rate);
        self.send(ControlMessage::SetCustomWavetables(Arc::new(tables)))
    }

    pub fn select_instrument(&mut self, id: impl Into<InstrumentId>) -> Result<(), EngineError> {
        self.send(ControlMessage::SelectInstrument(id.into()))
    }

    pub fn add_instrument(
        &mut self,
        id: impl Into<InstrumentId>,
        definition: InstrumentDefinition,
    ) -> Result<(), EngineError> {
        self.send(ControlMessage::AddInstrument {
            id: id.into(),
            definition,
        })
    }

    /// Decode `bytes` on this thread and register them as a new sampled
    /// instrument, returning its generated id.
    pub fn register_sample_instrument(&mut self, bytes: &[u8], root_note: u8) -> Result<InstrumentId, EngineError> {
        self.register_sample_instrument_with(&DefaultDecoder, bytes, root_note)
    }

    pub fn register_sample_instrument_with(
        &mut self,
        decoder: &dyn SampleDecoder,
        bytes: &[u8],
        root_note: u8,
    ) -> Result<InstrumentId, EngineError> {
        let audio = decoder.decode(bytes)?;
        let id = user_sample_id(self.next_user_index);
        self.send(ControlMessage::AddSampledInstrument {
            id: id.clone(),
            buffer: Arc::new(SampleBuffer::from(audio)),
            root_note,
        })?;
        self.next_user_index += 1;
        Ok(id)
    }

    pub fn register_drum_kit(
        &mut self,
        id: impl Into<InstrumentId>,
        map: BTreeMap<u8, String>,
        fallback: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.add_instrument(
            id,
            InstrumentDefinition::DrumKit {
                map,
                fallback: fallback.into(),
            },
        )
    }

    /// Mark `key` as loading; note-ons that need it are deferred.
    pub fn begin_sample_load(&mut self, key: impl Into<String>) -> Result<(), EngineError> {
        self.send(ControlMessage::BeginSampleLoad(key.into()))
    }

    /// Hand a finished (or failed) load to the engine.
    pub fn finish_sample_load(
        &mut self,
        key: impl Into<String>,
        result: Result<SampleBuffer, LoadError>,
    ) -> Result<(), EngineError> {
        self.send(ControlMessage::SampleLoaded {
            key: key.into(),
            result: result.map(Arc::new),
        })
    }

    pub fn is_capturing(&self) -> bool {
        self.recorder.is_some()
    }

    /// Start recording the master output.
    pub fn start_capture(&mut self, format: CaptureFormat) -> Result<(), EngineError> {
        if self.recorder.is_some() {
            return Err(CaptureError::AlreadyCapturing.into());
        }
        let capacity = (self.sample_rate as usize).max(1) * RING_SECONDS;
        let (producer, consumer) = RingBuffer::new(capacity);
        let recorder = Recorder::spawn(consumer, self.sample_rate as u32, format)?;
        if let Err(e) = self.send(ControlMessage::AttachCapture(producer)) {
            // The rejected message dropped the producer, so the worker exits.
            if let Err(finish) = recorder.finish() {
                warn!(error = %finish, "capture worker did not shut down cleanly");
            }
            return Err(e);
        }
        self.recorder = Some(recorder);
        Ok(())
    }

    /// Stop recording and return the encoded capture. If the detach cannot
    /// be queued the capture keeps running and the call can be retried.
    pub fn stop_capture(&mut self) -> Result<CapturedAudio, EngineError> {
        if self.recorder.is_none() {
            return Err(CaptureError::NotCapturing.into());
        }
        self.send(ControlMessage::DetachCapture)?;
        let recorder = self.recorder.take().ok_or(CaptureError::NotCapturing)?;
        Ok(recorder.finish()?)
    }
}

/// Audio-thread half. Owns the engine.
#[derive(Debug)]
pub struct SynthProcessor {
    synth: Synth,
    rx: Consumer<ControlMessage>,
    capture: Option<Producer<f32>>,
}

impl SynthProcessor {
    pub fn synth(&self) -> &Synth {
        &self.synth
    }

    pub fn into_synth(self) -> Synth {
        self.synth
    }

    /// Apply every queued control message.
    fn drain(&mut self) {
        while let Ok(message) = self.rx.pop() {
            self.apply(message);
        }
    }

    fn apply(&mut self, message: ControlMessage) {
        let synth = &mut self.synth;
        match message {
            ControlMessage::NoteOn { note, velocity, id } => synth.note_on(note, velocity, id),
            ControlMessage::NoteOff(id) => synth.note_off(id),
            ControlMessage::AllNotesOff => synth.all_notes_off(),
            ControlMessage::StartDrone => synth.start_drone(),
            ControlMessage::StopDrone => synth.stop_drone(),
            ControlMessage::Set(param) => synth.set_param(param),
            ControlMessage::SetReverb(reverb) => synth.set_reverb(*reverb),
            ControlMessage::SetCustomWavetables(tables) => synth.set_custom_wavetables(tables),
            ControlMessage::SelectInstrument(id) => {
                if let Err(e) = synth.select_instrument(&id) {
                    warn!(error = %e, "instrument selection ignored");
                }
            }
            ControlMessage::AddInstrument { id, definition } => synth.add_instrument(id, definition),
            ControlMessage::AddSampledInstrument {
                id,
                buffer,
                root_note,
            } => synth.add_sampled_instrument(id, buffer, root_note),
            ControlMessage::BeginSampleLoad(key) => synth.begin_sample_load(key),
            ControlMessage::SampleLoaded { key, result } => synth.finish_sample_load(&key, result),
            ControlMessage::AttachCapture(producer) => self.capture = Some(producer),
            ControlMessage::DetachCapture => self.capture = None,
        }
    }

    /// Render one block into separate channel buffers.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.drain();
        self.synth.render(left, right);
        if let Some(capture) = &mut self.capture {
            for (l, r) in left.iter().zip(right.iter()) {
                if capture.push(0.5 * (l + r)).is_err() {
                    break;
                }
            }
        }
    }

    /// Render one block into an interleaved buffer.
    pub fn process_interleaved(&mut self, out: &mut [f32], channels: usize) {
        self.drain();
        self.synth.render_interleaved(out, channels);
        if channels == 0 {
            return;
        }
        if let Some(capture) = &mut self.capture {
            for frame in out.chunks_exact(channels) {
                let mono = match frame {
                    [mono] => *mono,
                    [l, r, ..] => 0.5 * (l + r),
                    [] => 0.0,
                };
                if capture.push(mono).is_err() {
                    break;
                }
            }
        }
    }
}
